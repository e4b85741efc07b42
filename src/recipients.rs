use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

pub const ADDRESS_HEADER: &str = "address";

/// Rows taken up by the CSV header before the first recipient.
pub const HEADER_ROWS: usize = 1;

#[derive(Error, Debug)]
pub enum RecipientsError {
    #[error("failed to read recipients file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed recipients CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("recipients CSV has no '{ADDRESS_HEADER}' column (found: {0})")]
    MissingHeader(String),

    #[error("recipients file contains no addresses")]
    Empty,
}

/// A recipient address and the 1-based line it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub row: usize,
    pub address: String,
}

impl Recipient {
    /// Number addresses as if they were consecutive rows after the header.
    pub fn numbered<I, S>(addresses: I) -> Vec<Recipient>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        addresses
            .into_iter()
            .enumerate()
            .map(|(index, address)| Recipient {
                row: index + 1 + HEADER_ROWS,
                address: address.into(),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RecipientRow {
    address: String,
}

/// Read recipient addresses from a CSV file with an `address` header.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<Recipient>, RecipientsError> {
    let file = File::open(path)?;
    read(file)
}

/// Trimmed addresses in file order. Rows with a blank address are skipped but
/// still count towards the row numbers of the rows after them.
pub fn read<R: Read>(reader: R) -> Result<Vec<Recipient>, RecipientsError> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);

    let headers = rdr.headers()?.clone();
    if !headers.iter().any(|h| h == ADDRESS_HEADER) {
        return Err(RecipientsError::MissingHeader(
            headers.iter().collect::<Vec<_>>().join(","),
        ));
    }

    let mut recipients = Vec::new();
    for (index, record) in rdr.records().enumerate() {
        let record = record?;
        let row = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(index + 1 + HEADER_ROWS);
        let parsed: RecipientRow = record.deserialize(Some(&headers))?;
        if !parsed.address.is_empty() {
            recipients.push(Recipient {
                row,
                address: parsed.address,
            });
        }
    }

    if recipients.is_empty() {
        return Err(RecipientsError::Empty);
    }
    Ok(recipients)
}
