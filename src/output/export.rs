//! JSON Lines export of persisted records

use crate::storage::{RecordFilter, Storage};
use crate::ParsonicError;
use std::io::Write;

/// Writes every record matching `filter` as one JSON object per line
///
/// Records are written newest first. Returns the number of records written.
pub fn export_json_lines<S, W>(
    storage: &S,
    filter: RecordFilter,
    mut writer: W,
) -> Result<u64, ParsonicError>
where
    S: Storage,
    W: Write,
{
    let mut written = 0;
    for record in storage.query(filter) {
        let record = record?;
        serde_json::to_writer(&mut writer, &record).map_err(std::io::Error::from)?;
        writer.write_all(b"\n")?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}
