//! Stream compression layers for the tar family.
//!
//! gzip is always built in; bzip2, xz/lzma and lz4 sit behind cargo
//! features and report `UnsupportedCodec` when compiled out.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};

use super::ArchiveKind;
use crate::error::ArchiveError;

/// Preset used for xz and lzma-alone output.
#[cfg(feature = "xz")]
const XZ_PRESET: u32 = 6;

/// Whether this build can read and write `kind`.
pub fn ensure_available(kind: ArchiveKind) -> Result<(), ArchiveError> {
    let available = match kind {
        ArchiveKind::TarBz2 => cfg!(feature = "bzip2"),
        ArchiveKind::TarXz | ArchiveKind::TarLzma => cfg!(feature = "xz"),
        ArchiveKind::TarLz4 => cfg!(feature = "lz4"),
        _ => true,
    };
    if available {
        Ok(())
    } else {
        Err(ArchiveError::UnsupportedCodec { kind })
    }
}

/// Wrap a file in the decoder for a tar-family kind.
pub fn decoder(kind: ArchiveKind, file: File) -> Result<Box<dyn Read + Send>, ArchiveError> {
    ensure_available(kind)?;
    let reader = BufReader::new(file);
    let boxed: Box<dyn Read + Send> = match kind {
        ArchiveKind::Tar => Box::new(reader),
        ArchiveKind::TarGz => Box::new(flate2::read::MultiGzDecoder::new(reader)),
        #[cfg(feature = "bzip2")]
        ArchiveKind::TarBz2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
        #[cfg(feature = "xz")]
        ArchiveKind::TarXz => Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)),
        #[cfg(feature = "xz")]
        ArchiveKind::TarLzma => {
            let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX)
                .map_err(|e| ArchiveError::other(format!("lzma decoder: {}", e)))?;
            Box::new(xz2::read::XzDecoder::new_stream(reader, stream))
        }
        #[cfg(feature = "lz4")]
        ArchiveKind::TarLz4 => Box::new(lz4_flex::frame::FrameDecoder::new(reader)),
        other => {
            return Err(ArchiveError::UnsupportedOperation(format!(
                "{} is not a tar stream",
                other
            )))
        }
    };
    Ok(boxed)
}

/// Compressing writer for tar-family output. `finish` must be called to
/// write the codec trailer.
pub enum Encoder {
    Plain(BufWriter<File>),
    Gz(flate2::write::GzEncoder<BufWriter<File>>),
    #[cfg(feature = "bzip2")]
    Bz2(bzip2::write::BzEncoder<BufWriter<File>>),
    #[cfg(feature = "xz")]
    Xz(xz2::write::XzEncoder<BufWriter<File>>),
    #[cfg(feature = "lz4")]
    Lz4(lz4_flex::frame::FrameEncoder<BufWriter<File>>),
}

impl Encoder {
    pub fn new(kind: ArchiveKind, file: File) -> Result<Self, ArchiveError> {
        ensure_available(kind)?;
        let writer = BufWriter::new(file);
        let encoder = match kind {
            ArchiveKind::Tar => Encoder::Plain(writer),
            ArchiveKind::TarGz => Encoder::Gz(flate2::write::GzEncoder::new(
                writer,
                flate2::Compression::default(),
            )),
            #[cfg(feature = "bzip2")]
            ArchiveKind::TarBz2 => Encoder::Bz2(bzip2::write::BzEncoder::new(
                writer,
                bzip2::Compression::default(),
            )),
            #[cfg(feature = "xz")]
            ArchiveKind::TarXz => Encoder::Xz(xz2::write::XzEncoder::new(writer, XZ_PRESET)),
            #[cfg(feature = "xz")]
            ArchiveKind::TarLzma => {
                let options = xz2::stream::LzmaOptions::new_preset(XZ_PRESET)
                    .map_err(|e| ArchiveError::other(format!("lzma options: {}", e)))?;
                let stream = xz2::stream::Stream::new_lzma_encoder(&options)
                    .map_err(|e| ArchiveError::other(format!("lzma encoder: {}", e)))?;
                Encoder::Xz(xz2::write::XzEncoder::new_stream(writer, stream))
            }
            #[cfg(feature = "lz4")]
            ArchiveKind::TarLz4 => Encoder::Lz4(lz4_flex::frame::FrameEncoder::new(writer)),
            other => {
                return Err(ArchiveError::UnsupportedOperation(format!(
                    "{} is not a tar stream",
                    other
                )))
            }
        };
        Ok(encoder)
    }

    /// Write the codec trailer and flush to disk.
    pub fn finish(self) -> io::Result<()> {
        let mut inner = match self {
            Encoder::Plain(w) => w,
            Encoder::Gz(e) => e.finish()?,
            #[cfg(feature = "bzip2")]
            Encoder::Bz2(e) => e.finish()?,
            #[cfg(feature = "xz")]
            Encoder::Xz(e) => e.finish()?,
            #[cfg(feature = "lz4")]
            Encoder::Lz4(e) => e.finish().map_err(io::Error::other)?,
        };
        inner.flush()?;
        inner.get_ref().sync_all()
    }
}

impl Write for Encoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Plain(w) => w.write(buf),
            Encoder::Gz(e) => e.write(buf),
            #[cfg(feature = "bzip2")]
            Encoder::Bz2(e) => e.write(buf),
            #[cfg(feature = "xz")]
            Encoder::Xz(e) => e.write(buf),
            #[cfg(feature = "lz4")]
            Encoder::Lz4(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Plain(w) => w.flush(),
            Encoder::Gz(e) => e.flush(),
            #[cfg(feature = "bzip2")]
            Encoder::Bz2(e) => e.flush(),
            #[cfg(feature = "xz")]
            Encoder::Xz(e) => e.flush(),
            #[cfg(feature = "lz4")]
            Encoder::Lz4(e) => e.flush(),
        }
    }
}
