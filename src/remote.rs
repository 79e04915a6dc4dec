use camino::Utf8Path;
use suppaftp::FtpStream;
use suppaftp::types::FileType;
use tracing::debug;

use crate::error::GenomaError;
use crate::store::Store;

/// The two operations the crawler and downloader need from a remote file
/// store. Listing lines use the Unix long-listing layout.
pub trait RemoteTree {
    fn list(&mut self, directory: &str) -> Result<Vec<String>, GenomaError>;
    fn fetch(&mut self, path: &str, destination: &Utf8Path) -> Result<u64, GenomaError>;
}

pub struct FtpRemote {
    host: String,
    stream: Option<FtpStream>,
}

impl FtpRemote {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            stream: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn session(&mut self) -> Result<&mut FtpStream, GenomaError> {
        if self.stream.is_none() {
            self.stream = Some(connect(&self.host)?);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| GenomaError::RemoteConnection(format!("no session for {}", self.host)))
    }

    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.quit();
            debug!(host = %self.host, "ftp session closed");
        }
    }
}

impl Drop for FtpRemote {
    fn drop(&mut self) {
        self.close();
    }
}

fn connect(host: &str) -> Result<FtpStream, GenomaError> {
    let mut stream =
        FtpStream::connect(host).map_err(|err| GenomaError::RemoteConnection(err.to_string()))?;
    stream
        .login("anonymous", "anonymous")
        .map_err(|err| GenomaError::RemoteConnection(err.to_string()))?;
    stream
        .transfer_type(FileType::Binary)
        .map_err(|err| GenomaError::RemoteConnection(err.to_string()))?;
    debug!(host, "ftp session opened");
    Ok(stream)
}

impl RemoteTree for FtpRemote {
    fn list(&mut self, directory: &str) -> Result<Vec<String>, GenomaError> {
        self.session()?
            .list(Some(directory))
            .map_err(|err| GenomaError::RemoteListing {
                path: directory.to_string(),
                message: err.to_string(),
            })
    }

    fn fetch(&mut self, path: &str, destination: &Utf8Path) -> Result<u64, GenomaError> {
        let session = self.session()?;
        let mut data = session
            .retr_as_stream(path)
            .map_err(|err| GenomaError::RemoteFetch {
                path: path.to_string(),
                message: err.to_string(),
            })?;
        let written = Store::write_stream_atomic(destination, &mut data);
        session
            .finalize_retr_stream(data)
            .map_err(|err| GenomaError::RemoteFetch {
                path: path.to_string(),
                message: err.to_string(),
            })?;
        written
    }
}
