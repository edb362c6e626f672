#![allow(dead_code)]

pub const VIEWER_ID: &str = "viewer-1";
pub const ALICE_ID: &str = "user-alice";
pub const BOB_ID: &str = "user-bob";
pub const CAROL_ID: &str = "user-carol";

pub const POST_1_ID: &str = "post-1";
pub const POST_2_ID: &str = "post-2";
pub const POST_1_CONTENT: &str = "Sunset over the harbour";
pub const POST_2_CONTENT: &str = "First sourdough loaf!";

/// Watermark the viewer starts with.
pub const T0: &str = "2024-05-01T09:00:00.000Z";
/// Alice likes post 1.
pub const T1: &str = "2024-05-01T10:00:00.000Z";
/// Bob likes post 1.
pub const T2: &str = "2024-05-01T11:00:00.000Z";
/// Carol likes post 2.
pub const T3: &str = "2024-05-01T12:00:00.000Z";
