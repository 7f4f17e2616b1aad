//! Staging file arguments onto a channel's target

use std::path::Path;

use conduit_channels::Channel;
use tracing::debug;

use crate::error::StagingError;
use crate::file::File;

/// Push `file` into `working_dir` on the channel's target.
///
/// Returns the same file with its local path set to the staged copy. Only the
/// `file` scheme has a transport.
pub async fn stage_in(
    channel: &dyn Channel,
    file: &File,
    working_dir: &Path,
) -> Result<File, StagingError> {
    if file.scheme() != "file" {
        return Err(StagingError::UnsupportedScheme(file.scheme().to_string()));
    }

    let staged = channel.push_file(Path::new(file.path()), working_dir).await?;
    debug!(
        url = file.url(),
        staged = %staged.display(),
        channel = channel.kind(),
        "staged in"
    );
    Ok(file.clone().with_local_path(staged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_channels::{ChannelError, LocalChannel};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_stage_in_local_file() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("input.txt");
        std::fs::write(&source, "payload").unwrap();
        let work = temp.path().join("work");

        let channel = LocalChannel::new(temp.path());
        let file = File::parse(format!("file://{}", source.display()));
        let staged = stage_in(&channel, &file, &work).await.unwrap();

        let local = staged.local_path().unwrap();
        assert_eq!(local, work.join("input.txt"));
        assert_eq!(std::fs::read_to_string(local).unwrap(), "payload");
        assert_eq!(staged.url(), file.url());
    }

    #[tokio::test]
    async fn test_stage_in_escaped_file_url() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("my input.txt");
        std::fs::write(&source, "payload").unwrap();
        let work = temp.path().join("work");

        let url = url::Url::from_file_path(&source).unwrap();
        assert!(url.as_str().contains("%20"));

        let channel = LocalChannel::new(temp.path());
        let staged = stage_in(&channel, &File::parse(url.as_str()), &work)
            .await
            .unwrap();

        assert_eq!(staged.local_path(), Some(work.join("my input.txt").as_path()));
        assert_eq!(staged.filename(), "my input.txt");
    }

    #[tokio::test]
    async fn test_stage_in_plain_path() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("data.csv"), "a,b").unwrap();

        let channel = LocalChannel::new(temp.path());
        let staged = stage_in(&channel, &File::parse("data.csv"), Path::new("staged"))
            .await
            .unwrap();

        assert!(temp.path().join("staged").join("data.csv").is_file());
        assert_eq!(staged.filename(), "data.csv");
    }

    #[tokio::test]
    async fn test_stage_in_unknown_scheme() {
        let temp = TempDir::new().unwrap();
        let channel = LocalChannel::new(temp.path());

        let err = stage_in(&channel, &File::parse("globus://ep/x.dat"), temp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, StagingError::UnsupportedScheme(ref s) if s == "globus"));
    }

    #[tokio::test]
    async fn test_stage_in_missing_source() {
        let temp = TempDir::new().unwrap();
        let channel = LocalChannel::new(temp.path());

        let err = stage_in(&channel, &File::parse("missing.txt"), temp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, StagingError::Channel(ChannelError::NotFound(_))));
    }
}
