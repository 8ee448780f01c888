pub const COLOR_FRAME_RATE: u32 = 30;
pub const DEPTH_FRAME_RATE: u32 = 15;
pub const COLOR_WIDTH: u32 = 640;
pub const COLOR_HEIGHT: u32 = 480;
pub const DEPTH_WIDTH: u32 = 256;
pub const DEPTH_HEIGHT: u32 = 192;

// connections
pub const CAST_SERVICE_PORT: u16 = 31413;
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:31413";

/// Frame header size in bytes (type + timestamp + frame number + payload size + keyframe flag)
pub const FRAME_HEADER_SIZE: usize = 1 + 8 + 4 + 4 + 1; // 18 bytes

/// Maximum frame payload size (16 MiB, generous for high-bitrate color)
pub const MAX_FRAME_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

// depth calibration range in meters
pub const DEFAULT_MIN_DEPTH: f32 = 0.5;
pub const DEFAULT_MAX_DEPTH: f32 = 5.0;

pub const JPEG_QUALITY: u8 = 80;

pub const FINALIZE_GRACE_MS: u64 = 5000;
/// Longest timeline gap a recording fills with repeated frames
pub const MAX_FILL_SECS: u64 = 2;
pub const FPS_WINDOW_MS: u64 = 1000;
pub const STATS_LOG_INTERVAL_SECS: u64 = 5;
