use crate::file::csv::{
    error::FileError,
    settings::{CsvSettings, SourceMode},
};
use csv::{ByteRecord, Reader, ReaderBuilder};
use std::io::{Cursor, Read};
use tracing::debug;

/// One data record read off the source, addressed by its absolute index
/// (zero-based, counting data rows after the header).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRow {
    Record { index: u64, cells: Vec<String> },
    Malformed { index: u64, reason: String },
}

impl SourceRow {
    pub fn index(&self) -> u64 {
        match self {
            SourceRow::Record { index, .. } | SourceRow::Malformed { index, .. } => *index,
        }
    }
}

/// Streams data rows out of a CSV object.
///
/// Row-level problems surface as [`SourceRow::Malformed`] so the caller can keep
/// going; only I/O failures end the stream with an error.
pub struct CsvRowSource {
    reader: Reader<Box<dyn Read + Send>>,
    headers: Vec<String>,
    record: ByteRecord,
    next_index: u64,
    done: bool,
}

impl CsvRowSource {
    pub fn new<R>(input: R, settings: &CsvSettings) -> Result<Self, FileError>
    where
        R: Read + Send + 'static,
    {
        let input: Box<dyn Read + Send> = match settings.mode {
            SourceMode::Buffered => {
                let mut input = input;
                let mut buf = Vec::new();
                input.read_to_end(&mut buf)?;
                debug!(bytes = buf.len(), "Buffered CSV source in memory");
                Box::new(Cursor::new(buf))
            }
            SourceMode::Streaming => Box::new(input),
        };

        let mut reader = ReaderBuilder::new()
            .delimiter(settings.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(input);

        let mut record = ByteRecord::new();
        for _ in 0..settings.header_row {
            if !reader.read_byte_record(&mut record)? {
                return Err(FileError::MissingHeader(settings.header_row));
            }
        }
        if !reader.read_byte_record(&mut record)? {
            return Err(FileError::MissingHeader(settings.header_row));
        }
        let headers = record
            .iter()
            .map(|h| String::from_utf8_lossy(h).into_owned())
            .collect();

        Ok(CsvRowSource {
            reader,
            headers,
            record,
            next_index: 0,
            done: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn decode(&self, index: u64) -> SourceRow {
        if self.record.len() > self.headers.len() {
            return SourceRow::Malformed {
                index,
                reason: format!(
                    "row has {} fields but header has {}",
                    self.record.len(),
                    self.headers.len()
                ),
            };
        }

        let mut cells = Vec::with_capacity(self.record.len());
        for (pos, raw) in self.record.iter().enumerate() {
            match std::str::from_utf8(raw) {
                Ok(text) => cells.push(text.to_string()),
                Err(e) => {
                    return SourceRow::Malformed {
                        index,
                        reason: format!("field {pos} is not valid UTF-8: {e}"),
                    };
                }
            }
        }
        SourceRow::Record { index, cells }
    }
}

impl Iterator for CsvRowSource {
    type Item = Result<SourceRow, FileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let index = self.next_index;
        match self.reader.read_byte_record(&mut self.record) {
            Ok(true) => {
                self.next_index += 1;
                Some(Ok(self.decode(index)))
            }
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) if e.is_io_error() => {
                self.done = true;
                Some(Err(FileError::CsvError(e)))
            }
            Err(e) => {
                self.next_index += 1;
                Some(Ok(SourceRow::Malformed {
                    index,
                    reason: e.to_string(),
                }))
            }
        }
    }
}

/// Counts data rows with the same rules the planner uses to index them.
pub fn count_rows<R>(input: R, settings: &CsvSettings) -> Result<u64, FileError>
where
    R: Read + Send + 'static,
{
    let mut total = 0;
    for row in CsvRowSource::new(input, settings)? {
        row?;
        total += 1;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "MPN,Brand\nA-1,Acme\nA-2,Acme\nA-3,Other\n";

    fn rows(mode: SourceMode, data: &'static [u8]) -> Vec<SourceRow> {
        let settings = CsvSettings::default().with_mode(mode);
        CsvRowSource::new(data, &settings)
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn yields_indexed_records() {
        let rows = rows(SourceMode::Streaming, SAMPLE.as_bytes());
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[2],
            SourceRow::Record {
                index: 2,
                cells: vec!["A-3".into(), "Other".into()]
            }
        );
    }

    #[test]
    fn buffered_and_streaming_agree() {
        assert_eq!(
            rows(SourceMode::Buffered, SAMPLE.as_bytes()),
            rows(SourceMode::Streaming, SAMPLE.as_bytes())
        );
    }

    #[test]
    fn header_row_offset_skips_preamble() {
        let data = "Vendor export\ngenerated today\nMPN,Brand\nA-1,Acme\n";
        let settings = CsvSettings::default().with_header_row(2);
        let source = CsvRowSource::new(data.as_bytes(), &settings).unwrap();
        assert_eq!(source.headers(), ["MPN", "Brand"]);
        assert_eq!(source.count(), 1);
    }

    #[test]
    fn malformed_rows_keep_their_index() {
        let data: &'static [u8] = b"MPN,Brand\nA-1,Acme\nA-2,Acme,extra\nA-3,\xff\nA-4,Acme\n";
        let rows = rows(SourceMode::Streaming, data);
        assert_eq!(rows.len(), 4);
        assert!(matches!(rows[1], SourceRow::Malformed { index: 1, .. }));
        assert!(matches!(rows[2], SourceRow::Malformed { index: 2, .. }));
        assert_eq!(rows[3].index(), 3);
    }

    #[test]
    fn missing_header_is_an_error() {
        let settings = CsvSettings::default().with_header_row(5);
        let err = CsvRowSource::new("a,b\n".as_bytes(), &settings).err();
        assert!(matches!(err, Some(FileError::MissingHeader(5))));
    }

    #[test]
    fn count_rows_matches_iteration() {
        let total = count_rows(SAMPLE.as_bytes(), &CsvSettings::default()).unwrap();
        assert_eq!(total, 3);
    }
}
