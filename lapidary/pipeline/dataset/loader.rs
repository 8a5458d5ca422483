use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

use super::Dataset;
use crate::settings::SourceSettings;

/// Dataset acquisition failures.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Local file does not exist.
    #[error("dataset file {0} not found")]
    NotFound(PathBuf),
    /// Local file could not be read.
    #[error("reading dataset {path}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The remote request failed before a response arrived.
    #[error("fetching {url}: {detail}")]
    Network {
        /// Requested URL.
        url: String,
        /// Transport error message.
        detail: String,
    },
    /// The remote server answered with a non-success status.
    #[error("fetching {url}: HTTP status {status}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Status code.
        status: u16,
    },
    /// The source has no header row.
    #[error("dataset {0} is empty")]
    Empty(String),
    /// The content is not valid delimited text.
    #[error("malformed dataset {origin}: {detail}")]
    Format {
        /// File path or URL.
        origin: String,
        /// Parser message.
        detail: String,
    },
    /// Persisting a dataset failed.
    #[error("writing dataset {path}: {detail}")]
    Write {
        /// Destination.
        path: PathBuf,
        /// Writer message.
        detail: String,
    },
}

/// Loads the configured source.
pub fn acquire(source: &SourceSettings) -> Result<Dataset, DatasetError> {
    match source {
        SourceSettings::Local { path } => load_local(path),
        SourceSettings::Remote { url, timeout } => load_remote(url, *timeout),
    }
}

/// Reads a CSV file from disk.
pub fn load_local(path: impl AsRef<Path>) -> Result<Dataset, DatasetError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => DatasetError::NotFound(path.to_path_buf()),
        _ => DatasetError::Io {
            path: path.to_path_buf(),
            source,
        },
    })?;
    parse_csv(&bytes, &path.display().to_string())
}

/// Fetches a CSV document with a single GET; no retries.
pub fn load_remote(url: &str, timeout: Duration) -> Result<Dataset, DatasetError> {
    let network = |err: reqwest::Error| DatasetError::Network {
        url: url.to_owned(),
        detail: err.to_string(),
    };
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(network)?;
    let response = client.get(url).send().map_err(network)?;
    let status = response.status();
    if !status.is_success() {
        return Err(DatasetError::HttpStatus {
            url: url.to_owned(),
            status: status.as_u16(),
        });
    }
    let body = response.bytes().map_err(network)?;
    parse_csv(&body, url)
}

/// Parses CSV bytes with a header row. Fields are trimmed; unnamed headers
/// become `Unnamed: <index>` and repeated headers get a `.<n>` suffix.
pub fn parse_csv(bytes: &[u8], origin: &str) -> Result<Dataset, DatasetError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(DatasetError::Empty(origin.to_owned()));
    }
    let format = |err: csv::Error| DatasetError::Format {
        origin: origin.to_owned(),
        detail: err.to_string(),
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(false)
        .from_reader(bytes);
    let raw_headers = reader.headers().map_err(format)?.clone();
    if raw_headers.is_empty() {
        return Err(DatasetError::Empty(origin.to_owned()));
    }
    let headers = normalise_headers(raw_headers.iter());
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(format)?;
        rows.push(record.iter().map(ToOwned::to_owned).collect());
    }
    Dataset::from_raw(headers, rows).map_err(|err| match err {
        DatasetError::Format { detail, .. } => DatasetError::Format {
            origin: origin.to_owned(),
            detail,
        },
        other => other,
    })
}

fn normalise_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.enumerate()
        .map(|(idx, name)| {
            let base = if name.is_empty() {
                format!("Unnamed: {idx}")
            } else {
                name.to_owned()
            };
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{base}.{}", *count - 1)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Cell, ColumnKind};
    use std::{
        io::{Read, Write},
        net::TcpListener,
        thread,
    };
    use tempfile::tempdir;

    fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = Vec::new();
                let mut buf = [0_u8; 1024];
                while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Type: text/csv\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });
        format!("http://{addr}/diamonds.csv")
    }

    #[test]
    fn local_file_is_parsed_with_trimmed_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("diamonds.csv");
        fs::write(&path, ",carat , cut\n0, 0.23 , Ideal \n1,0.21,Premium\n").unwrap();
        let dataset = load_local(&path).unwrap();
        assert_eq!(
            dataset.column_names().collect::<Vec<_>>(),
            vec!["Unnamed: 0", "carat", "cut"]
        );
        assert_eq!(dataset.row(0).get("cut"), Some(&Cell::Text("Ideal".into())));
        assert_eq!(dataset.column("carat").unwrap().kind, ColumnKind::Numeric);
    }

    #[test]
    fn missing_local_file_is_not_found() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_local(dir.path().join("absent.csv")),
            Err(DatasetError::NotFound(_))
        ));
    }

    #[test]
    fn ragged_rows_are_format_errors() {
        let err = parse_csv(b"a,b\n1,2\n3\n", "inline").unwrap_err();
        assert!(matches!(err, DatasetError::Format { .. }));
        assert!(matches!(
            parse_csv(b"  \n", "inline"),
            Err(DatasetError::Empty(_))
        ));
    }

    #[test]
    fn repeated_headers_are_suffixed() {
        let dataset = parse_csv(b"x,x,x\n1,2,3\n", "inline").unwrap();
        assert_eq!(
            dataset.column_names().collect::<Vec<_>>(),
            vec!["x", "x.1", "x.2"]
        );
    }

    #[test]
    fn remote_source_is_fetched_over_http() {
        let url = serve_once("200 OK", "carat,price\n0.5,1200\n0.7,2100\n");
        let dataset = load_remote(&url, Duration::from_secs(5)).unwrap();
        assert_eq!(dataset.n_rows(), 2);
        assert_eq!(dataset.row(1).get("price"), Some(&Cell::Number(2100.0)));
    }

    #[test]
    fn remote_error_status_is_reported() {
        let url = serve_once("404 Not Found", "missing");
        assert!(matches!(
            load_remote(&url, Duration::from_secs(5)),
            Err(DatasetError::HttpStatus { status: 404, .. })
        ));
    }

    #[test]
    fn remote_empty_body_is_empty() {
        let url = serve_once("200 OK", "");
        assert!(matches!(
            load_remote(&url, Duration::from_secs(5)),
            Err(DatasetError::Empty(_))
        ));
    }

    #[test]
    fn unreachable_host_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(matches!(
            load_remote(&format!("http://{addr}/x.csv"), Duration::from_secs(2)),
            Err(DatasetError::Network { .. })
        ));
    }
}
