//! Hard caps that keep a single tenant from exhausting memory or the WAL.

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_VENUES_PER_TENANT: usize = 100_000;
pub const MAX_FIELDS_PER_TENANT: usize = 100_000;
pub const MAX_PRICE_RULES_PER_FIELD: usize = 512;
pub const MAX_BOOKINGS_PER_FIELD: usize = 1_000_000;

/// Upper bound on `size` for a booking history page.
pub const MAX_PAGE_SIZE: usize = 100;
pub const DEFAULT_PAGE_SIZE: usize = 10;

pub const MAX_PROVIDER_LEN: usize = 32;
pub const MAX_TRANSACTION_REF_LEN: usize = 128;
