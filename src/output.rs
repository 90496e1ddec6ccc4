//! 共有出力ストリーム（gzip対応）。
//!
//! PGN・サンプル・結果ログの出力先は全ワーカーが共有する。1局分の
//! レコードをまとめて1回のロックで書くので、対局同士の出力は混ざらない。

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

enum Stream {
    Plain(BufWriter<File>),
    Stdout(io::Stdout),
    Gz(flate2::write::GzEncoder<File>),
}

impl Stream {
    fn open(path: &Path) -> io::Result<Self> {
        if path.to_string_lossy() == "-" {
            return Ok(Stream::Stdout(io::stdout()));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let ext =
            path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
        let f = File::create(path)?;
        Ok(if ext == "gz" {
            Stream::Gz(flate2::write::GzEncoder::new(f, flate2::Compression::default()))
        } else {
            Stream::Plain(BufWriter::new(f))
        })
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Stream::Plain(w) => w.write_all(buf),
            Stream::Stdout(s) => s.write_all(buf),
            Stream::Gz(e) => e.write_all(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(w) => w.flush(),
            Stream::Stdout(s) => s.flush(),
            Stream::Gz(e) => e.flush(),
        }
    }

    /// gzipのトレーラまで書き切ってから下層のファイルをflushする。
    fn close(self) -> io::Result<()> {
        match self {
            Stream::Plain(w) => w.into_inner().map_err(|e| e.into_error())?.flush(),
            Stream::Stdout(mut s) => s.flush(),
            Stream::Gz(e) => e.finish()?.flush(),
        }
    }
}

/// ワーカー間で共有する出力先。拡張子 `.gz` で透過的にgzip圧縮し、
/// パス `-` は標準出力に書く。
#[must_use = "call .close() to propagate compression/IO errors"]
pub struct SharedSink {
    stream: Mutex<Stream>,
}

impl SharedSink {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self {
            stream: Mutex::new(Stream::open(path.as_ref())?),
        })
    }

    /// 1回の呼び出しが1回のロック。1局分のレコードはまとめて渡すこと。
    pub fn write_batch(&self, bytes: &[u8]) -> io::Result<()> {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write_all(bytes)
    }

    /// 逐次追記するログ向け。改行を足して即flushする。
    pub fn write_line(&self, bytes: &[u8]) -> io::Result<()> {
        let mut s = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        s.write_all(bytes)?;
        s.write_all(b"\n")?;
        s.flush()
    }

    pub fn close(self) -> io::Result<()> {
        self.stream
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .close()
    }
}
