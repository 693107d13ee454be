pub mod bins;
pub mod lock;
pub mod process;

pub mod time {
    use anyhow::{Context, Result};
    use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};

    /// Timestamp embedded in snapshot tags and artifact file names:
    /// `YYYY-MM-DD_THH-MM-SS`. Lexical order equals chronological order.
    pub const STAMP_FORMAT: &[BorrowedFormatItem<'static>] =
        format_description!("[year]-[month]-[day]_T[hour]-[minute]-[second]");

    pub fn now_stamp() -> Result<String> {
        stamp_at(OffsetDateTime::now_utc())
    }

    pub fn stamp_at(dt: OffsetDateTime) -> Result<String> {
        dt.format(&STAMP_FORMAT).context("format snapshot stamp")
    }

}
