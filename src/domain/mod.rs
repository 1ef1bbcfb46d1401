// Domain types: enumerations, money and paging rules shared by every service.
pub mod money;
pub mod pagination;
pub mod status;

pub use money::{AmountError, PaymentAmounts};
pub use pagination::{PageRequest, PageWindow, Paginated};
pub use status::{
    AccountStatus, ApartmentStatus, InquiryStatus, MediaKind, TransactionStatus, UnknownVariant,
    UserType,
};

/// Inquiries expire this many days after creation.
pub const INQUIRY_TTL_DAYS: i64 = 7;

/// Soft-deleted rows are physically removed this many days after deletion.
pub const SOFT_DELETE_TTL_DAYS: i64 = 90;

/// Session tokens are valid for this many hours.
pub const SESSION_TTL_HOURS: i64 = 24;
