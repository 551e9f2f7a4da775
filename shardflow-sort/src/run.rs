//! Spilled run files
//!
//! A run is a sequence of records, each an 8-byte big-endian payload length
//! followed by the encoded key datums, value datums and handle, back to back.
//! Runs are written once, sorted, and read back sequentially during merge.

use shardflow_core::{decode_datums, encode_datums, Datum};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use crate::error::RunError;
use crate::ComparableRow;

const HEADER_LEN: usize = 8;

/// Upper bound on a single record, guards against corrupt headers
pub const MAX_RECORD_BYTES: u64 = 256 * 1024 * 1024;

/// Write `rows` to a fresh run file at `path`, replacing any existing file
pub fn write_run(path: &Path, rows: &[ComparableRow]) -> Result<(), RunError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = options.open(path)?;
    let mut writer = BufWriter::new(file);

    let mut body = Vec::new();
    for row in rows {
        body.clear();
        encode_datums(&mut body, &row.key);
        encode_datums(&mut body, &row.val);
        encode_datums(&mut body, &[Datum::Int(row.handle)]);

        writer.write_all(&(body.len() as u64).to_be_bytes())?;
        writer.write_all(&body)?;
    }
    writer.flush()?;
    Ok(())
}

/// Sequential reader over one run file
#[derive(Debug)]
pub struct RunReader {
    reader: BufReader<File>,
    key_size: usize,
    val_size: usize,
    body: Vec<u8>,
}

impl RunReader {
    pub fn open(path: &Path, key_size: usize, val_size: usize) -> Result<Self, RunError> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            key_size,
            val_size,
            body: Vec::new(),
        })
    }

    /// Next record, or `None` at a clean end of file
    pub fn next_row(&mut self) -> Result<Option<ComparableRow>, RunError> {
        let mut header = [0u8; HEADER_LEN];
        let n = read_full(&mut self.reader, &mut header)?;
        if n == 0 {
            return Ok(None);
        }
        if n != HEADER_LEN {
            return Err(RunError::IncorrectHeader(n));
        }

        let declared = u64::from_be_bytes(header);
        if declared > MAX_RECORD_BYTES {
            return Err(RunError::OversizedRow(declared));
        }
        self.body.resize(declared as usize, 0);
        let n = read_full(&mut self.reader, &mut self.body)?;
        if n != self.body.len() {
            return Err(RunError::IncorrectRow {
                declared,
                actual: n,
            });
        }

        let mut datums = decode_datums(&self.body, self.key_size + self.val_size + 1)?;
        let handle = match datums.pop() {
            Some(Datum::Int(h)) => h,
            _ => return Err(RunError::BadHandle),
        };
        let val = datums.split_off(self.key_size);
        Ok(Some(ComparableRow::new(datums, val, handle)))
    }
}

/// Fill `buf` as far as the input allows, returning how many bytes were read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize, RunError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rows() -> Vec<ComparableRow> {
        vec![
            ComparableRow::new(vec![Datum::Int(1)], vec![Datum::from("a")], 10),
            ComparableRow::new(vec![Datum::Int(2)], vec![Datum::Null], 11),
        ]
    }

    #[test]
    fn test_written_run_reads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0");
        write_run(&path, &rows()).unwrap();

        let mut reader = RunReader::open(&path, 1, 1).unwrap();
        assert_eq!(reader.next_row().unwrap().unwrap(), rows()[0]);
        assert_eq!(reader.next_row().unwrap().unwrap(), rows()[1]);
        assert!(reader.next_row().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0");
        write_run(&path, &rows()).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_truncated_header_and_body() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0");

        std::fs::write(&path, [0u8, 0, 0]).unwrap();
        let mut reader = RunReader::open(&path, 1, 1).unwrap();
        assert!(matches!(
            reader.next_row(),
            Err(RunError::IncorrectHeader(3))
        ));

        let mut data = 100u64.to_be_bytes().to_vec();
        data.extend_from_slice(&[3, 0, 0]);
        std::fs::write(&path, data).unwrap();
        let mut reader = RunReader::open(&path, 1, 1).unwrap();
        assert!(matches!(
            reader.next_row(),
            Err(RunError::IncorrectRow {
                declared: 100,
                actual: 3
            })
        ));
    }
}
