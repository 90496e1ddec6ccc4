use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// ワーカースレッドごとの文脈。乱数列はワーカーidから決定的に再現できる。
pub struct Worker {
    pub id: usize,
    pub rng: ChaCha8Rng,
    log: Option<BufWriter<File>>,
}

impl Worker {
    pub fn new(id: usize, log_dir: Option<&Path>) -> Result<Self> {
        let log = match log_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
                let path = dir.join(format!("worker-{id}.log"));
                let file = File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                Some(BufWriter::new(file))
            }
            None => None,
        };
        Ok(Self {
            id,
            rng: ChaCha8Rng::seed_from_u64(id as u64),
            log,
        })
    }

    /// ワーカーログに1行書く。ログ未設定なら何もしない。
    pub fn log_line(&mut self, line: &str) {
        if let Some(w) = &mut self.log {
            let _ = writeln!(w, "{line}");
        }
    }

    pub fn flush_log(&mut self) {
        if let Some(w) = &mut self.log {
            let _ = w.flush();
        }
    }
}
