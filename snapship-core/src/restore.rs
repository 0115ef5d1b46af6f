/*!
Reading compressed artifacts back.

Used to check an artifact before or after it was shipped. Decompression into
a file follows the same rule as compression: the output is removed again if
anything fails.
*/

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::compression::PendingArtifact;
use crate::{Result, SnapshipError};

const CHUNK_SIZE: usize = 64 * 1024;

fn open_artifact(path: &Path) -> Result<GzDecoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| SnapshipError::OpenArtifact {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(GzDecoder::new(BufReader::new(file)))
}

/// Decompress `artifact` into `dest`, returning the number of bytes written
///
/// `dest` must not exist yet; it is created, filled and synced before
/// returning. An existing file (including the artifact itself) is never
/// overwritten, and a failed restore removes only the file it created.
pub fn decompress_file<P: AsRef<Path>, Q: AsRef<Path>>(artifact: P, dest: Q) -> Result<u64> {
    let artifact = artifact.as_ref();
    let dest = dest.as_ref();
    let mut decoder = open_artifact(artifact)?;

    let restore_err = |e: io::Error| SnapshipError::Restore {
        path: dest.to_path_buf(),
        source: e,
    };

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(restore_err)?;
    let pending = PendingArtifact::new(dest.to_path_buf());
    let mut output = file;

    let written = io::copy(&mut decoder, &mut output).map_err(restore_err)?;
    output.flush().map_err(restore_err)?;
    output.sync_all().map_err(restore_err)?;
    drop(output);

    let path = pending.commit();
    info!(
        artifact = %artifact.display(),
        dest = %path.display(),
        size = written,
        "Artifact restored"
    );
    Ok(written)
}

/// Decode the whole artifact and return its decompressed size
///
/// This checks the gzip framing and CRC without writing anything.
pub fn inspect_artifact<P: AsRef<Path>>(artifact: P) -> Result<u64> {
    let artifact = artifact.as_ref();
    let mut decoder = open_artifact(artifact)?;

    let size = io::copy(&mut decoder, &mut io::sink()).map_err(|e| SnapshipError::Restore {
        path: artifact.to_path_buf(),
        source: e,
    })?;

    debug!(artifact = %artifact.display(), size, "Artifact decoded");
    Ok(size)
}

/// True when `artifact` decompresses to exactly the bytes of `original`
pub fn artifact_matches<P: AsRef<Path>, Q: AsRef<Path>>(
    artifact: P,
    original: Q,
) -> Result<bool> {
    let artifact = artifact.as_ref();
    let original = original.as_ref();

    let mut decoder = open_artifact(artifact)?;
    let mut expected = BufReader::new(File::open(original).map_err(|e| {
        SnapshipError::OpenSource {
            path: original.to_path_buf(),
            source: e,
        }
    })?);

    let mut left = vec![0u8; CHUNK_SIZE];
    let mut right = vec![0u8; CHUNK_SIZE];

    loop {
        let n = read_full(&mut decoder, &mut left).map_err(|e| SnapshipError::Restore {
            path: artifact.to_path_buf(),
            source: e,
        })?;
        let m = read_full(&mut expected, &mut right).map_err(|e| SnapshipError::OpenSource {
            path: original.to_path_buf(),
            source: e,
        })?;

        if n != m || left[..n] != right[..m] {
            return Ok(false);
        }
        if n == 0 {
            return Ok(true);
        }
    }
}

/// Fill `buf` as far as the reader allows, returning how much was read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
