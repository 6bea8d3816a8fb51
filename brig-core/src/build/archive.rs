//! Detection of archives piped in as build context.

/// Size of one tar header block.
pub(crate) const ARCHIVE_HEADER_SIZE: usize = 512;

const MAGIC_GZIP: &[u8] = &[0x1f, 0x8b, 0x08];
const MAGIC_BZIP2: &[u8] = &[0x42, 0x5a, 0x68];
const MAGIC_XZ: &[u8] = &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];
const MAGIC_ZSTD: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

/// Whether `header` starts a compressed stream or a tar archive.
pub(crate) fn is_archive(header: &[u8]) -> bool {
    let compressed = [MAGIC_GZIP, MAGIC_BZIP2, MAGIC_XZ, MAGIC_ZSTD]
        .iter()
        .any(|magic| header.starts_with(magic));
    compressed || is_tar(header)
}

fn is_tar(header: &[u8]) -> bool {
    if header.len() < ARCHIVE_HEADER_SIZE {
        return false;
    }
    let mut archive = tar::Archive::new(header);
    let first = match archive.entries() {
        Ok(mut entries) => matches!(entries.next(), Some(Ok(_))),
        Err(_) => false,
    };
    first
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tar_with_file(name: &str, body: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, body).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_tar_detected() {
        let archive = tar_with_file("Dockerfile", b"FROM alpine\n");
        assert!(is_archive(&archive[..ARCHIVE_HEADER_SIZE * 2]));
    }

    #[test]
    fn test_compressed_magic_detected() {
        assert!(is_archive(&[0x1f, 0x8b, 0x08, 0x00, 0x00]));
        assert!(is_archive(b"BZh91AY&SY"));
        assert!(is_archive(&[0x28, 0xb5, 0x2f, 0xfd, 0x04]));
    }

    #[test]
    fn test_dockerfile_is_not_archive() {
        let mut dockerfile = b"FROM alpine\nRUN echo hello\n".to_vec();
        assert!(!is_archive(&dockerfile));
        dockerfile.resize(ARCHIVE_HEADER_SIZE * 2, b'#');
        assert!(!is_archive(&dockerfile));
    }

    #[test]
    fn test_empty_input_is_not_archive() {
        assert!(!is_archive(&[]));
    }
}
