use crate::model::Ms;

pub const MAX_ROOMS_PER_TENANT: usize = 10_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;

pub const MAX_ROOM_NAME_LEN: usize = 256;
pub const MAX_TITLE_LEN: usize = 512;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_AMENITIES: usize = 32;
pub const MAX_AMENITY_LEN: usize = 64;
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 256;

/// 1970-01-01T00:00:00Z. Bookings before the epoch are nonsense.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Utilization reports walk the window day by day; cap it at ~5 years.
pub const MAX_REPORT_WINDOW_MS: Ms = 5 * 366 * 24 * 3_600_000;

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 500;

pub const MAX_TENANT_NAME_LEN: usize = 256;
pub const MAX_TENANTS: usize = 1024;
