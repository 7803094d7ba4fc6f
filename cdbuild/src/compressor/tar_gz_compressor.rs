use std::{
    fs::{self, File, Metadata},
    io::{self, BufReader, Read, Take, Write},
    path::{Path, PathBuf},
};

use flate2::{Compression, write::GzEncoder};
use tar::{Builder, EntryType, Header};
use walkdir::WalkDir;

/// Writes a directory tree as a gzip-compressed tarball.
///
/// Entries are visited in file-name order so the same tree always produces
/// the same entry sequence. The root itself is not part of the archive.
#[derive(Debug, Clone)]
pub struct TarGzCompressor {
    source_dir: PathBuf,
}

impl TarGzCompressor {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Archive the tree into `writer` and hand the writer back.
    ///
    /// The tar stream is finished first, then the gzip trailer is written, and
    /// finally `writer` is flushed. On error nothing is finished, so the caller
    /// can abort whatever `writer` feeds instead of committing a short archive.
    pub fn compress_to<W: Write>(&self, writer: W) -> io::Result<W> {
        let source_path = &self.source_dir;
        if !source_path.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Source path is not a directory: {}", source_path.display()),
            ));
        }

        let encoder = GzEncoder::new(writer, Compression::default());
        let mut tar_builder = Builder::new(encoder);
        tar_builder.follow_symlinks(false);

        for entry in WalkDir::new(source_path)
            .follow_links(false)
            .sort_by_file_name()
            .min_depth(1)
        {
            let entry = entry.map_err(io::Error::from)?;
            let path = entry.path();
            let metadata = entry.metadata().map_err(io::Error::from)?;

            // relative path used in tar file
            let relative_path = path
                .strip_prefix(source_path)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

            let file_type = metadata.file_type();
            if file_type.is_file() {
                self.append_file(&mut tar_builder, path, relative_path, &metadata)?;
            } else if file_type.is_dir() {
                self.append_dir(&mut tar_builder, relative_path, &metadata)?;
            } else if file_type.is_symlink() {
                self.append_symlink(&mut tar_builder, path, relative_path, &metadata)?;
            } else {
                tracing::warn!("Skip unsupported file type: {}", path.display());
            }
        }

        let encoder = tar_builder.into_inner()?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        Ok(writer)
    }

    /// Add regular file
    fn append_file<W: Write>(
        &self,
        builder: &mut Builder<W>,
        path: &Path,
        name: &Path,
        metadata: &Metadata,
    ) -> io::Result<()> {
        let file = File::open(path).map_err(|err| with_path(err, path))?;
        let mut header = Header::new_gnu();
        header.set_metadata(metadata);
        header.set_entry_type(EntryType::Regular);
        header.set_size(metadata.len());

        // the header already promised metadata.len() bytes
        let mut reader = ExactReader::new(BufReader::new(file), metadata.len());
        builder
            .append_data(&mut header, name, &mut reader)
            .and_then(|()| reader.finish())
            .map_err(|err| with_path(err, path))
    }

    /// Add directory
    fn append_dir<W: Write>(
        &self,
        builder: &mut Builder<W>,
        name: &Path,
        metadata: &Metadata,
    ) -> io::Result<()> {
        let mut dir_name = name.as_os_str().to_owned();
        dir_name.push("/");
        let mut header = Header::new_gnu();
        header.set_metadata(metadata);
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);

        builder.append_data(&mut header, Path::new(&dir_name), io::empty())
    }

    /// Add symbolic link, keeping the link target as-is
    fn append_symlink<W: Write>(
        &self,
        builder: &mut Builder<W>,
        path: &Path,
        name: &Path,
        metadata: &Metadata,
    ) -> io::Result<()> {
        let target = fs::read_link(path).map_err(|err| with_path(err, path))?;
        let mut header = Header::new_gnu();
        header.set_metadata(metadata);
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);

        builder.append_link(&mut header, name, target)
    }
}

/// Yields exactly `expected` bytes of `inner`, failing if it runs dry early.
/// [`ExactReader::finish`] reports bytes left over past `expected`.
struct ExactReader<R> {
    inner: Take<R>,
    expected: u64,
}

impl<R: Read> ExactReader<R> {
    fn new(inner: R, expected: u64) -> Self {
        Self {
            inner: inner.take(expected),
            expected,
        }
    }

    fn finish(self) -> io::Result<()> {
        let mut rest = self.inner.into_inner();
        let mut byte = [0u8; 1];
        if rest.read(&mut byte)? > 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file grew past {} bytes while being archived", self.expected),
            ));
        }
        Ok(())
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() && self.inner.limit() > 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "file shrank while being archived: {} of {} bytes missing",
                    self.inner.limit(),
                    self.expected
                ),
            ));
        }
        Ok(n)
    }
}

fn with_path(err: io::Error, path: &Path) -> io::Error {
    io::Error::new(err.kind(), format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::io::Read;

    use flate2::read::GzDecoder;
    use tempfile::tempdir;

    use super::{ExactReader, TarGzCompressor};

    fn unpack(bytes: &[u8]) -> BTreeMap<String, Option<Vec<u8>>> {
        let mut archive = tar::Archive::new(GzDecoder::new(bytes));
        let mut entries = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let content = if entry.header().entry_type().is_file() {
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf).unwrap();
                Some(buf)
            } else {
                None
            };
            entries.insert(name, content);
        }
        entries
    }

    #[test]
    fn test_compression() {
        let tmp_dir = tempdir().unwrap();
        let source_dir = tmp_dir.path();
        fs::write(source_dir.join("Dockerfile"), "FROM scratch\n").unwrap();
        fs::create_dir_all(source_dir.join("src/bin")).unwrap();
        fs::write(source_dir.join("src/bin/main.go"), "package main\n").unwrap();

        let bytes = TarGzCompressor::new(source_dir)
            .compress_to(Vec::new())
            .unwrap();
        let entries = unpack(&bytes);

        assert_eq!(
            entries.keys().cloned().collect::<Vec<_>>(),
            vec!["Dockerfile", "src/", "src/bin/", "src/bin/main.go"]
        );
        assert_eq!(
            entries["Dockerfile"].as_deref(),
            Some(b"FROM scratch\n".as_slice())
        );
        assert_eq!(
            entries["src/bin/main.go"].as_deref(),
            Some(b"package main\n".as_slice())
        );
    }

    #[test]
    fn test_entry_order_is_stable() {
        let tmp_dir = tempdir().unwrap();
        let source_dir = tmp_dir.path();
        for name in ["b.txt", "a.txt", "c.txt"] {
            fs::write(source_dir.join(name), name).unwrap();
        }

        let compressor = TarGzCompressor::new(source_dir);
        let first = compressor.compress_to(Vec::new()).unwrap();
        let second = compressor.compress_to(Vec::new()).unwrap();
        assert_eq!(first, second);

        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(first.as_slice()));
        let names = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[test]
    fn test_empty_directory() {
        let tmp_dir = tempdir().unwrap();
        let bytes = TarGzCompressor::new(tmp_dir.path())
            .compress_to(Vec::new())
            .unwrap();
        assert!(!bytes.is_empty());
        assert!(unpack(&bytes).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_is_kept() {
        let tmp_dir = tempdir().unwrap();
        let source_dir = tmp_dir.path();
        fs::write(source_dir.join("target.txt"), "hi").unwrap();
        std::os::unix::fs::symlink("target.txt", source_dir.join("link.txt")).unwrap();

        let bytes = TarGzCompressor::new(source_dir)
            .compress_to(Vec::new())
            .unwrap();
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(bytes.as_slice()));
        let link = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap())
            .find(|entry| entry.path().unwrap().to_string_lossy() == "link.txt")
            .unwrap();
        assert!(link.header().entry_type().is_symlink());
        assert_eq!(
            link.link_name().unwrap().unwrap().to_string_lossy(),
            "target.txt"
        );
    }

    #[test]
    fn test_missing_source_dir() {
        let tmp_dir = tempdir().unwrap();
        let err = TarGzCompressor::new(tmp_dir.path().join("nope"))
            .compress_to(Vec::new())
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_aborts() {
        use std::os::unix::fs::PermissionsExt;

        let tmp_dir = tempdir().unwrap();
        let source_dir = tmp_dir.path();
        fs::write(source_dir.join("a.txt"), "readable").unwrap();
        let secret = source_dir.join("b.txt");
        fs::write(&secret, "secret").unwrap();
        fs::set_permissions(&secret, fs::Permissions::from_mode(0o000)).unwrap();

        // root ignores permission bits
        if fs::File::open(&secret).is_ok() {
            return;
        }

        let result = TarGzCompressor::new(source_dir).compress_to(Vec::new());
        fs::set_permissions(&secret, fs::Permissions::from_mode(0o644)).unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::PermissionDenied);
        assert!(err.to_string().contains("b.txt"));
    }

    #[test]
    fn test_writer_error_propagates() {
        #[derive(Debug)]
        struct FailingWriter;

        impl std::io::Write for FailingWriter {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk on fire"))
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let tmp_dir = tempdir().unwrap();
        fs::write(tmp_dir.path().join("big.bin"), vec![7u8; 256 * 1024]).unwrap();

        let err = TarGzCompressor::new(tmp_dir.path())
            .compress_to(FailingWriter)
            .unwrap_err();
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn test_file_smaller_than_header_aborts() {
        let tmp_dir = tempdir().unwrap();
        let source_dir = tmp_dir.path();
        fs::write(source_dir.join("big.bin"), vec![1u8; 4096]).unwrap();
        fs::write(source_dir.join("small.bin"), b"tiny").unwrap();

        // metadata says 4096 bytes, the file on disk holds 4
        let stale = fs::metadata(source_dir.join("big.bin")).unwrap();
        let compressor = TarGzCompressor::new(source_dir);
        let mut builder = tar::Builder::new(Vec::new());
        let err = compressor
            .append_file(
                &mut builder,
                &source_dir.join("small.bin"),
                std::path::Path::new("small.bin"),
                &stale,
            )
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
        assert!(err.to_string().contains("small.bin"));
    }

    #[test]
    fn test_file_larger_than_header_aborts() {
        let tmp_dir = tempdir().unwrap();
        let source_dir = tmp_dir.path();
        fs::write(source_dir.join("small.bin"), b"tiny").unwrap();
        fs::write(source_dir.join("big.bin"), vec![1u8; 4096]).unwrap();

        let stale = fs::metadata(source_dir.join("small.bin")).unwrap();
        let compressor = TarGzCompressor::new(source_dir);
        let mut builder = tar::Builder::new(Vec::new());
        let err = compressor
            .append_file(
                &mut builder,
                &source_dir.join("big.bin"),
                std::path::Path::new("big.bin"),
                &stale,
            )
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_exact_reader() {
        let mut out = Vec::new();
        let mut reader = ExactReader::new(&b"hello"[..], 5);
        std::io::copy(&mut reader, &mut out).unwrap();
        reader.finish().unwrap();
        assert_eq!(out, b"hello");

        let mut short = ExactReader::new(&b"hel"[..], 5);
        let err = std::io::copy(&mut short, &mut std::io::sink()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
