//! Debian package unpacking.
//!
//! A `.deb` is an `ar` archive holding `debian-binary`, `control.tar.*` and
//! `data.tar.*`. Only the data member matters here; it is decompressed on the
//! fly and unpacked into the destination tree.

use crate::archive::unpack_tar;
use crate::error::{InstallError, Result};
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Gzip,
    Xz,
    Zstd,
}

fn data_member_compression(name: &str) -> Option<Compression> {
    // GNU ar terminates member names with '/'.
    match name.trim_end_matches('/') {
        "data.tar" => Some(Compression::None),
        "data.tar.gz" => Some(Compression::Gzip),
        "data.tar.xz" => Some(Compression::Xz),
        "data.tar.zst" => Some(Compression::Zstd),
        _ => None,
    }
}

/// Unpack the `data.tar.*` member of `deb` into `dest`, merging with
/// whatever is already there.
pub fn unpack_deb(deb: &Path, dest: &Path) -> Result<()> {
    let mut archive = ar::Archive::new(File::open(deb)?);

    while let Some(entry) = archive.next_entry() {
        let mut entry = entry.map_err(|e| invalid(deb, e))?;
        let name = String::from_utf8_lossy(entry.header().identifier()).into_owned();
        let Some(compression) = data_member_compression(&name) else {
            continue;
        };

        tracing::debug!(package = %deb.display(), member = %name, "unpacking");
        return match compression {
            Compression::None => unpack_tar(&mut entry, dest),
            Compression::Gzip => unpack_tar(flate2::read::GzDecoder::new(&mut entry), dest),
            Compression::Xz => unpack_tar(xz2::read::XzDecoder::new(&mut entry), dest),
            Compression::Zstd => {
                let decoder =
                    zstd::stream::read::Decoder::new(&mut entry).map_err(|e| invalid(deb, e))?;
                unpack_tar(decoder, dest)
            }
        };
    }

    Err(InstallError::Validation(format!(
        "{} contains no data.tar member",
        deb.display()
    )))
}

fn invalid(deb: &Path, e: std::io::Error) -> InstallError {
    InstallError::Validation(format!("{} is not a valid package: {e}", deb.display()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::archive::tests::{tar_bytes, tar_gz_bytes};
    use std::io::Write;
    use tempfile::TempDir;

    fn ar_bytes(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut builder = ar::Builder::new(Vec::new());
        for (name, data) in members {
            let header = ar::Header::new(name.as_bytes().to_vec(), data.len() as u64);
            builder.append(&header, data.as_slice()).unwrap();
        }
        builder.into_inner().unwrap()
    }

    /// A `.deb` whose data member is xz-compressed, as Debian ships them.
    pub(crate) fn deb_xz(files: &[(&str, &str)]) -> Vec<u8> {
        let mut enc = xz2::write::XzEncoder::new(Vec::new(), 1);
        enc.write_all(&tar_bytes(files)).unwrap();
        let data = enc.finish().unwrap();
        ar_bytes(&[
            ("debian-binary", b"2.0\n".to_vec()),
            ("control.tar.gz", tar_gz_bytes(&[("./control", "Package: x\n")])),
            ("data.tar.xz", data),
        ])
    }

    #[test]
    fn unpacks_xz_data_member() {
        let dir = TempDir::new().unwrap();
        let deb = dir.path().join("espeak-ng.deb");
        std::fs::write(&deb, deb_xz(&[("./usr/bin/espeak-ng", "#!bin")])).unwrap();

        let tree = dir.path().join("tree");
        unpack_deb(&deb, &tree).unwrap();
        assert!(tree.join("usr/bin/espeak-ng").is_file());
        assert!(!tree.join("control").exists());
    }

    #[test]
    fn unpacks_zstd_and_gzip_members() {
        let dir = TempDir::new().unwrap();
        let tree = dir.path().join("tree");

        let zst = zstd::stream::encode_all(tar_bytes(&[("usr/lib/a.so", "a")]).as_slice(), 1)
            .unwrap();
        let deb = dir.path().join("a.deb");
        std::fs::write(&deb, ar_bytes(&[("debian-binary", b"2.0\n".to_vec()), ("data.tar.zst", zst)]))
            .unwrap();
        unpack_deb(&deb, &tree).unwrap();

        let gz = tar_gz_bytes(&[("usr/lib/b.so", "b")]);
        let deb = dir.path().join("b.deb");
        std::fs::write(&deb, ar_bytes(&[("data.tar.gz", gz)])).unwrap();
        unpack_deb(&deb, &tree).unwrap();

        assert!(tree.join("usr/lib/a.so").is_file());
        assert!(tree.join("usr/lib/b.so").is_file());
    }

    #[test]
    fn missing_data_member_is_validation_error() {
        let dir = TempDir::new().unwrap();
        let deb = dir.path().join("empty.deb");
        std::fs::write(&deb, ar_bytes(&[("debian-binary", b"2.0\n".to_vec())])).unwrap();
        let err = unpack_deb(&deb, &dir.path().join("tree")).unwrap_err();
        assert!(matches!(err, InstallError::Validation(_)));
    }

    #[test]
    fn member_name_matching() {
        assert_eq!(data_member_compression("data.tar.xz"), Some(Compression::Xz));
        assert_eq!(data_member_compression("data.tar.zst/"), Some(Compression::Zstd));
        assert_eq!(data_member_compression("control.tar.xz"), None);
    }
}
