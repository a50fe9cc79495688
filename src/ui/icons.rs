//! Shared UI icons.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");

// Pipeline stages
pub static TEST: Emoji<'_, '_> = Emoji("🧪 ", "[T]");
pub static COMPRESS: Emoji<'_, '_> = Emoji("🗜️  ", "[C]");
pub static MODEL: Emoji<'_, '_> = Emoji("🤖 ", "[M]");
pub static FILE_MOD: Emoji<'_, '_> = Emoji("📝 ", "~");
pub static BUDGET: Emoji<'_, '_> = Emoji("📊 ", "[B]");
