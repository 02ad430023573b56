use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate};
use parquet::errors::ParquetError;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use thiserror::Error;

use crate::util::format_date;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("unsupported file format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode delimited table {}: {source}", path.display())]
    Delimited {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to decode parquet table {}: {source}", path.display())]
    Parquet {
        path: PathBuf,
        #[source]
        source: ParquetError,
    },

    #[error("missing required columns in {}: {}", path.display(), columns.join(", "))]
    MissingColumns { path: PathBuf, columns: Vec<String> },
}

impl FileError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::Unreadable { .. } => "unreadable",
            Self::Delimited { .. } => "delimited_decode",
            Self::Parquet { .. } => "parquet_decode",
            Self::MissingColumns { .. } => "missing_columns",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TableFormat {
    Delimited,
    Parquet,
}

impl TableFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?;
        if extension.eq_ignore_ascii_case("csv") {
            Some(Self::Delimited)
        } else if extension.eq_ignore_ascii_case("parquet") {
            Some(Self::Parquet)
        } else {
            None
        }
    }
}

/// Header plus text cells; both input formats land here so the rest of the
/// pipeline sees one row shape. Blank cells are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn read(path: &Path) -> Result<Self, FileError> {
        match TableFormat::from_path(path) {
            Some(TableFormat::Delimited) => {
                let file = File::open(path).map_err(|source| FileError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_delimited(file).map_err(|source| FileError::Delimited {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Some(TableFormat::Parquet) => Self::read_parquet(path),
            None => Err(FileError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn from_delimited<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let columns: Vec<String> = reader
            .headers()?
            .iter()
            .map(|name| name.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut cells = vec![None; columns.len()];
            for (idx, cell) in record.iter().take(columns.len()).enumerate() {
                let cell = cell.trim();
                if !cell.is_empty() {
                    cells[idx] = Some(cell.to_string());
                }
            }
            rows.push(cells);
        }

        Ok(Self { columns, rows })
    }

    fn read_parquet(path: &Path) -> Result<Self, FileError> {
        let parquet_error = |source| FileError::Parquet {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(|source| FileError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = SerializedFileReader::new(file).map_err(parquet_error)?;

        let columns: Vec<String> = reader
            .metadata()
            .file_metadata()
            .schema_descr()
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect();

        let mut rows = Vec::new();
        for row in reader.get_row_iter(None).map_err(parquet_error)? {
            let row = row.map_err(parquet_error)?;
            let mut cells = vec![None; columns.len()];
            for (name, field) in row.get_column_iter() {
                if let Some(idx) = columns.iter().position(|column| column == name) {
                    cells[idx] = field_to_cell(field);
                }
            }
            rows.push(cells);
        }

        Ok(Self { columns, rows })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|cells| Row { cells })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    cells: &'a [Option<String>],
}

impl<'a> Row<'a> {
    pub fn get(&self, idx: usize) -> Option<&'a str> {
        self.cells.get(idx).and_then(|cell| cell.as_deref())
    }

    pub fn get_opt(&self, idx: Option<usize>) -> Option<&'a str> {
        idx.and_then(|idx| self.get(idx))
    }
}

fn field_to_cell(field: &Field) -> Option<String> {
    match field {
        Field::Null => None,
        Field::Str(value) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Field::Float(value) => Some(value.to_string()),
        Field::Double(value) => Some(value.to_string()),
        Field::Date(days) => epoch_days_to_date(*days).map(format_date),
        Field::TimestampMillis(millis) => {
            DateTime::from_timestamp_millis(*millis).map(|ts| format_date(ts.date_naive()))
        }
        Field::TimestampMicros(micros) => {
            DateTime::from_timestamp_micros(*micros).map(|ts| format_date(ts.date_naive()))
        }
        other => Some(other.to_string()),
    }
}

fn epoch_days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(chrono::Duration::days(i64::from(days)))
}
