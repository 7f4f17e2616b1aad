//! File arguments
//!
//! A `File` names data by location. It is usually an output the task has not
//! written yet, so its identity is its URL and never its content.

use std::any::Any;
use std::path::{Path, PathBuf};

use url::Url;

use crate::value::{ArgObject, TypeTag, Value};

/// A file referenced by URL or plain local path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    url: String,
    scheme: String,
    netloc: String,
    path: String,
    local_path: Option<PathBuf>,
}

impl File {
    pub const TYPE_TAG: TypeTag = TypeTag::new("conduit.file");

    /// Parse a URL (`file:///tmp/x`, `ftp://host/data.csv`) or a plain path
    pub fn parse(url: impl Into<String>) -> Self {
        let url = url.into();
        match Url::parse(&url) {
            Ok(parsed) if parsed.scheme().len() > 1 => Self {
                scheme: parsed.scheme().to_string(),
                netloc: parsed.host_str().unwrap_or_default().to_string(),
                path: decoded_path(&parsed),
                local_path: None,
                url,
            },
            // Bare paths and drive letters ("C:\x") are local files
            _ => Self {
                scheme: "file".to_string(),
                netloc: String::new(),
                path: url.clone(),
                local_path: None,
                url,
            },
        }
    }

    /// The URL this file was created from
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn netloc(&self) -> &str {
        &self.netloc
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Final path component
    pub fn filename(&self) -> &str {
        Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Where the file was staged to, if it has been
    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    /// Record the staged location
    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    /// Path a command on the target should use: the staged copy if any
    pub fn filepath(&self) -> PathBuf {
        self.local_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.path))
    }
}

/// Filesystem path of a `file` URL with percent escapes decoded
fn decoded_path(parsed: &Url) -> String {
    if parsed.scheme() == "file" {
        if let Ok(path) = parsed.to_file_path() {
            return path.to_string_lossy().into_owned();
        }
    }
    parsed.path().to_string()
}

impl ArgObject for File {
    fn type_tag(&self) -> TypeTag {
        Self::TYPE_TAG
    }

    fn structural(&self) -> Option<Value> {
        Some(Value::Str(self.url.clone()))
    }

    fn render(&self) -> String {
        self.filepath().to_string_lossy().into_owned()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<File> for Value {
    fn from(file: File) -> Self {
        Value::object(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_url() {
        let file = File::parse("file:///tmp/data/input.csv");
        assert_eq!(file.scheme(), "file");
        assert_eq!(file.netloc(), "");
        assert_eq!(file.path(), "/tmp/data/input.csv");
        assert_eq!(file.filename(), "input.csv");
        assert_eq!(file.url(), "file:///tmp/data/input.csv");
    }

    #[test]
    fn test_parse_file_url_decodes_escapes() {
        let file = File::parse("file:///tmp/data/my%20input.txt");
        assert_eq!(file.path(), "/tmp/data/my input.txt");
        assert_eq!(file.filename(), "my input.txt");
        assert_eq!(file.url(), "file:///tmp/data/my%20input.txt");
    }

    #[test]
    fn test_parse_remote_url() {
        let file = File::parse("ftp://ftp.example.org/pub/data.txt");
        assert_eq!(file.scheme(), "ftp");
        assert_eq!(file.netloc(), "ftp.example.org");
        assert_eq!(file.path(), "/pub/data.txt");
        assert_eq!(file.filename(), "data.txt");
    }

    #[test]
    fn test_parse_plain_path() {
        let file = File::parse("test.memoization.tmp");
        assert_eq!(file.scheme(), "file");
        assert_eq!(file.path(), "test.memoization.tmp");
        assert_eq!(file.url(), "test.memoization.tmp");
        assert_eq!(file.render(), "test.memoization.tmp");
    }

    #[test]
    fn test_local_path_used_for_rendering() {
        let file = File::parse("ftp://host/a.txt").with_local_path("/work/a.txt");
        assert_eq!(file.local_path(), Some(Path::new("/work/a.txt")));
        assert_eq!(file.render(), "/work/a.txt");
    }

    #[test]
    fn test_into_value() {
        let value: Value = File::parse("/tmp/x").into();
        assert_eq!(value.type_tag(), File::TYPE_TAG);
        assert!(value.downcast_ref::<File>().is_some());
    }
}
