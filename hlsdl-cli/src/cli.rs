use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "hlsdl",
    version,
    about = "Download an HLS presentation into a single media file",
    long_about = "Downloads every segment of an HLS playlist concurrently, decrypts AES-128\n\
                  segments, joins them in sequence order into video.ts and, when ffmpeg is\n\
                  available, remuxes the result into all.mp4."
)]
pub struct Args {
    /// Playlist URL (master or media)
    pub url: String,

    /// Output directory for segments and the final file
    #[arg(short = 'd', long = "dir", default_value = "./download")]
    pub output_dir: PathBuf,

    /// Number of concurrent segment downloads
    #[arg(short, long, default_value_t = 4)]
    pub workers: usize,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Keep the joined transport stream and skip ffmpeg
    #[arg(long)]
    pub no_remux: bool,

    /// Path to the ffmpeg binary (defaults to $FFMPEG_PATH, then `ffmpeg`)
    #[arg(long = "ffmpeg", value_name = "PATH")]
    pub ffmpeg_path: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub timeout: u64,

    /// Total attempts per segment, first attempt included
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub retries: u32,

    /// Delay between attempts in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    pub retry_delay_ms: u64,

    /// Override the User-Agent header
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Add a request header, may be repeated. Format: 'Name: Value'
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}
