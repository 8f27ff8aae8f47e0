//! 下载进度上报与 CLI 进度条。

use std::collections::HashMap;
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::network_parser::models::Volume;

/// 单卷的最终状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Downloaded,
    Skipped,
    Failed,
}

/// 下载过程回调；批量下载时会在工作线程中调用。
pub trait DownloadObserver: Send + Sync {
    fn started(&self, _volume: &Volume) {}
    /// 传输开始前的总字节数（来自 Content-Length）。
    fn total(&self, _vol_id: &str, _bytes: u64) {}
    fn advanced(&self, _vol_id: &str, _bytes: u64) {}
    fn finished(&self, _vol_id: &str, _outcome: Outcome) {}
}

pub struct NoopObserver;

impl DownloadObserver for NoopObserver {}

/// 一条总进度条加每卷一条字节进度条。
pub struct CliProgress {
    mp: MultiProgress,
    overall: ProgressBar,
    bars: Mutex<HashMap<String, ProgressBar>>,
    byte_style: ProgressStyle,
}

impl CliProgress {
    pub fn new(volume_count: usize) -> Self {
        let mp = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template(
            "{prefix} [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
        let byte_style = ProgressStyle::with_template(
            "{prefix} [{elapsed_precise}] {wide_bar} {bytes}/{total_bytes} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        let overall = mp.add(ProgressBar::new(volume_count as u64));
        overall.set_style(style);
        overall.set_prefix("卷下载");

        Self {
            mp,
            overall,
            bars: Mutex::new(HashMap::new()),
            byte_style,
        }
    }

    fn with_bar(&self, vol_id: &str, f: impl FnOnce(&ProgressBar)) {
        let bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = bars.get(vol_id) {
            f(bar);
        }
    }

    pub fn finish(&self) {
        self.overall.finish_and_clear();
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        for (_, bar) in bars.drain() {
            bar.finish_and_clear();
        }
    }
}

impl DownloadObserver for CliProgress {
    fn started(&self, volume: &Volume) {
        let bar = self.mp.add(ProgressBar::new(0));
        bar.set_style(self.byte_style.clone());
        bar.set_prefix(volume.title.clone());
        self.bars
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(volume.vol_id.clone(), bar);
    }

    fn total(&self, vol_id: &str, bytes: u64) {
        // 换地址重试时从头计数
        self.with_bar(vol_id, |bar| {
            bar.set_length(bytes);
            bar.set_position(0);
        });
    }

    fn advanced(&self, vol_id: &str, bytes: u64) {
        self.with_bar(vol_id, |bar| bar.inc(bytes));
    }

    fn finished(&self, vol_id: &str, _outcome: Outcome) {
        let bar = self
            .bars
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(vol_id);
        if let Some(bar) = bar {
            bar.finish_and_clear();
            self.mp.remove(&bar);
        }
        self.overall.inc(1);
    }
}
