//! Streaming upload spooling for multipart file parts.
//!
//! Each file part of a multipart body gets its own temp file under the
//! server's uploads directory (`tempfile::Builder`), written to as data
//! arrives, and only renamed into place on `save`/`save_as`. Refuses to
//! silently clobber an existing file or directory at the destination.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One file part of a multipart request, open for writing until `save`/
/// `save_as` closes and renames it.
pub struct Upload {
    dir: PathBuf,
    field: String,
    name: String,
    mime: Option<String>,
    encoding: Option<String>,
    tmp_path: PathBuf,
    dest: PathBuf,
    file: Option<File>,
    size: u64,
}

impl Upload {
    /// Opens a new spool file under `dir`. Fails if `dir` doesn't exist
    /// or isn't a directory.
    pub(crate) fn create(
        dir: &Path,
        field: &str,
        name: &str,
        mime: Option<&str>,
        encoding: Option<&str>,
    ) -> Result<Self> {
        let metadata = std::fs::metadata(dir).map_err(|_| Error::NotFound)?;
        if !metadata.is_dir() {
            return Err(Error::BadFile);
        }
        let tmp = tempfile::Builder::new()
            .prefix("kiss_upld_tmp_")
            .tempfile_in(dir)
            .map_err(|_| Error::BadFile)?;
        let (file, tmp_path) = tmp.keep().map_err(|_| Error::BadFile)?;
        Ok(Self {
            dir: dir.to_owned(),
            field: field.to_owned(),
            name: name.to_owned(),
            mime: mime.map(str::to_owned),
            encoding: encoding.map(str::to_owned),
            tmp_path,
            dest: dir.join(name),
            file: Some(file),
            size: 0,
        })
    }

    /// Appends a chunk of the incoming body to the spool file.
    pub(crate) fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::Already)?;
        file.write_all(data).map_err(Error::Io)?;
        self.size += data.len() as u64;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Closes and renames the spool file to its default destination
    /// (`dir/name`).
    pub fn save(&mut self, overwritten: bool) -> Result<()> {
        let dest = self.dest.clone();
        self.save_as(&dest, overwritten)
    }

    /// Closes and renames the spool file to an explicit path. Refuses to
    /// overwrite a directory outright, and refuses to overwrite an
    /// existing file unless `overwritten` is set.
    pub fn save_as(&mut self, path: &Path, overwritten: bool) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Err(Error::Already);
        };
        drop(file);
        if let Ok(metadata) = std::fs::metadata(path) {
            if metadata.is_dir() {
                return Err(Error::IsADirectory);
            }
            if !overwritten {
                return Err(Error::Exists);
            }
            std::fs::remove_file(path).map_err(Error::Io)?;
        }
        std::fs::rename(&self.tmp_path, path).map_err(Error::Io)?;
        Ok(())
    }
}

impl Drop for Upload {
    /// Unlinks the spool file if it was never saved.
    fn drop(&mut self) {
        if self.file.is_some() {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

/// Per-request upload state: completed parts plus the part currently
/// being written to.
#[derive(Default)]
pub struct UploadEngine {
    uploads: Vec<Upload>,
    total_size: u64,
}

impl UploadEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a new file part. `dir` is the server's configured uploads
    /// directory.
    pub fn begin_part(
        &mut self,
        dir: &Path,
        field: &str,
        name: &str,
        mime: Option<&str>,
        encoding: Option<&str>,
    ) -> Result<()> {
        let upload = Upload::create(dir, field, name, mime, encoding)?;
        self.uploads.push(upload);
        Ok(())
    }

    /// Feeds a chunk of data into the part currently being written,
    /// enforcing `limit` (0 = unbounded) against the request's running
    /// total.
    pub fn write_chunk(&mut self, data: &[u8], limit: u64) -> Result<()> {
        let upload = self.uploads.last_mut().ok_or(Error::NotFound)?;
        upload.write_chunk(data)?;
        self.total_size += data.len() as u64;
        if limit > 0 && self.total_size > limit {
            return Err(Error::UploadTooLarge);
        }
        Ok(())
    }

    pub fn uploads(&self) -> &[Upload] {
        &self.uploads
    }

    pub fn uploads_mut(&mut self) -> &mut [Upload] {
        &mut self.uploads
    }

    pub fn count(&self) -> usize {
        self.uploads.len()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Visits uploads in arrival order. `cb` returning nonzero stops the
    /// iteration early and that value is returned.
    pub fn iter<F>(&self, mut cb: F) -> i32
    where
        F: FnMut(&Upload) -> i32,
    {
        for upload in &self.uploads {
            let rc = cb(upload);
            if rc != 0 {
                return rc;
            }
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_part_rejects_missing_directory() {
        let mut engine = UploadEngine::new();
        let result = engine.begin_part(Path::new("/no/such/dir/kiss"), "file", "a.txt", None, None);
        assert!(result.is_err());
    }

    #[test]
    fn write_chunk_accumulates_size_and_enforces_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = UploadEngine::new();
        engine
            .begin_part(tmp.path(), "file", "a.txt", Some("text/plain"), None)
            .unwrap();
        engine.write_chunk(b"hello", 0).unwrap();
        assert_eq!(engine.total_size(), 5);
        let result = engine.write_chunk(&vec![0u8; 100], 10);
        assert!(matches!(result, Err(Error::UploadTooLarge)));
    }

    #[test]
    fn save_renames_temp_file_into_place() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = UploadEngine::new();
        engine
            .begin_part(tmp.path(), "file", "out.txt", None, None)
            .unwrap();
        engine.write_chunk(b"payload", 0).unwrap();
        engine.uploads_mut()[0].save(false).unwrap();
        let content = std::fs::read(tmp.path().join("out.txt")).unwrap();
        assert_eq!(content, b"payload");
    }

    #[test]
    fn save_refuses_overwrite_unless_requested() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("out.txt"), b"old").unwrap();
        let mut engine = UploadEngine::new();
        engine
            .begin_part(tmp.path(), "file", "out.txt", None, None)
            .unwrap();
        engine.write_chunk(b"new", 0).unwrap();
        let result = engine.uploads_mut()[0].save(false);
        assert!(matches!(result, Err(Error::Exists)));
    }

    #[test]
    fn dropping_unsaved_upload_removes_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let tmp_path;
        {
            let mut engine = UploadEngine::new();
            engine
                .begin_part(tmp.path(), "file", "a.txt", None, None)
                .unwrap();
            engine.write_chunk(b"data", 0).unwrap();
            tmp_path = engine.uploads()[0].tmp_path.clone();
            assert!(tmp_path.exists());
        }
        assert!(!tmp_path.exists());
    }
}
