use crate::model::Ms;

pub const MAX_TENANTS: usize = 10_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_NOTE_LEN: usize = 1024;

pub const MAX_CLINICS_PER_COMPANY: usize = 1_000;
pub const MAX_EMPLOYEES_PER_COMPANY: usize = 10_000;
pub const MAX_APPOINTMENTS_PER_EMPLOYEE: usize = 100_000;
pub const MAX_GROUP_SIZE: u32 = 500;

/// Credits a single payment may add.
pub const MAX_CREDITS_PER_PAYMENT: u32 = 1_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest single appointment: one day.
pub const MAX_APPOINTMENT_DURATION_MS: Ms = 24 * 3_600_000;

/// Widest window accepted by list/free-time queries: one year.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;
