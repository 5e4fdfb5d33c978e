use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::level_filters::LevelFilter;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// MP4 ファイルから H.264 (Annex-B) と AAC (ADTS) のエレメンタリーストリームを取り出す
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// 入力 MP4 ファイル
    pub input: PathBuf,

    /// 映像の出力先（Annex-B 形式の .h264 ファイル）
    #[arg(long)]
    pub video_out: Option<PathBuf>,

    /// 音声の出力先（ADTS 形式の .aac ファイル）
    #[arg(long)]
    pub audio_out: Option<PathBuf>,

    /// トラックごとに書き出すサンプル数の上限
    #[arg(short = 'n', long)]
    pub max_samples: Option<u32>,

    /// 映像サンプルを先頭の NAL ユニットだけでなく、アクセスユニット全体として書き出す
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub access_units: bool,

    /// 一つのサンプルとして読み出しを許容する最大バイト数
    #[arg(long, default_value_t = mp4_sample_extractor::SessionOptions::DEFAULT_MAX_SAMPLE_SIZE)]
    pub max_sample_size: u32,

    /// ログレベル（RUST_LOG 環境変数が設定されている場合はそちらが優先される）
    #[arg(short, long, value_enum, default_value = "warn")]
    pub log_level: LogLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_args() {
        let args = Args::try_parse_from(["mp4-extract", "in.mp4"]).unwrap();
        assert_eq!(args.input, PathBuf::from("in.mp4"));
        assert!(args.video_out.is_none());
        assert_eq!(args.log_level, LogLevel::Warn);
        assert!(!args.access_units);
    }

    #[test]
    fn parse_full_args() {
        let args = Args::try_parse_from([
            "mp4-extract",
            "in.mp4",
            "--video-out",
            "out.h264",
            "--audio-out",
            "out.aac",
            "-n",
            "10",
            "--access-units",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.max_samples, Some(10));
        assert!(args.access_units);
        assert_eq!(LevelFilter::from(args.log_level), LevelFilter::DEBUG);
    }
}
