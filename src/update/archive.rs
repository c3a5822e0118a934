use std::io::Read;

use flate2::read::GzDecoder;
use md5::{Digest, Md5};
use tar::Archive;
use tracing::debug;

use crate::cache::DATABASE_EXTENSION;
use crate::error::{Error, Result};

/// Pull the first `.mmdb` file out of a `.tar.gz` archive.
pub fn extract_database(archive: &[u8], edition_id: &str) -> Result<Vec<u8>> {
    let mut archive = Archive::new(GzDecoder::new(archive));

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let is_database = entry
            .path()?
            .extension()
            .is_some_and(|ext| ext == DATABASE_EXTENSION);
        if !is_database {
            continue;
        }

        let mut contents = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry.read_to_end(&mut contents)?;
        debug!(
            edition = edition_id,
            bytes = contents.len(),
            "extracted database from archive"
        );
        return Ok(contents);
    }

    Err(Error::MissingArchiveEntry {
        edition_id: edition_id.to_string(),
    })
}

/// Lowercase hex MD5 of `bytes`.
pub fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn tar_gz(entries: &[(&str, Option<&str>)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            match contents {
                Some(data) => {
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_size(data.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();
                    builder
                        .append_data(&mut header, name, data.as_bytes())
                        .unwrap();
                }
                None => {
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_size(0);
                    header.set_mode(0o755);
                    header.set_cksum();
                    builder.append_data(&mut header, name, std::io::empty()).unwrap();
                }
            }
        }
        let tar = builder.into_inner().unwrap();
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        std::io::Write::write_all(&mut gz, &tar).unwrap();
        gz.finish().unwrap()
    }

    #[test]
    fn finds_database_inside_dated_directory() {
        let archive = tar_gz(&[
            ("GeoLite2-Country_20240101", None),
            ("GeoLite2-Country_20240101/LICENSE.txt", Some("license")),
            ("GeoLite2-Country_20240101/GeoLite2-Country.mmdb", Some("database")),
        ]);
        let contents = extract_database(&archive, "GeoLite2-Country").unwrap();
        assert_eq!(contents, b"database");
    }

    #[test]
    fn archive_without_database_is_an_error() {
        let archive = tar_gz(&[("GeoLite2-Country_20240101/README.txt", Some("readme"))]);
        let err = extract_database(&archive, "GeoLite2-Country").unwrap_err();
        assert!(matches!(err, Error::MissingArchiveEntry { .. }));
    }

    #[test]
    fn garbage_is_an_io_error() {
        let err = extract_database(b"definitely not gzip", "GeoLite2-Country").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn md5_is_lowercase_hex() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }
}
