// Closed enumerations for every role and status column.
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Returned when a string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares an enum stored as TEXT, serialized with the same spelling.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_enum!(
    /// Verification state of a user account.
    AccountStatus {
        Unverified => "Unverified",
        Pending => "Pending",
        Verified => "Verified",
        Rejected => "Rejected",
        Deleted => "Deleted",
    }
);

text_enum!(
    /// Role carried in session tokens.
    UserType {
        Tenant => "Tenant",
        Landlord => "Landlord",
        Admin => "Admin",
    }
);

text_enum!(
    ApartmentStatus {
        Pending => "Pending",
        Approved => "Approved",
        Rejected => "Rejected",
        Deleted => "Deleted",
    }
);

text_enum!(
    /// `Pending → Accepted | Rejected | Expired`
    InquiryStatus {
        Pending => "Pending",
        Accepted => "Accepted",
        Rejected => "Rejected",
        Expired => "Expired",
    }
);

text_enum!(
    TransactionStatus {
        Pending => "pending",
        Paid => "paid",
        Failed => "failed",
    }
);

text_enum!(
    MediaKind {
        Image => "image",
        Video => "video",
    }
);

impl AccountStatus {
    /// Statuses counted as live accounts in statistics.
    pub const ACTIVE: [AccountStatus; 3] = [
        AccountStatus::Unverified,
        AccountStatus::Pending,
        AccountStatus::Verified,
    ];

    /// Accounts in these states may not obtain a session.
    pub fn blocks_login(&self) -> bool {
        matches!(self, AccountStatus::Rejected | AccountStatus::Deleted)
    }
}

impl InquiryStatus {
    /// A landlord may only set one of the two decision states.
    pub fn is_decision(&self) -> bool {
        matches!(self, InquiryStatus::Accepted | InquiryStatus::Rejected)
    }
}
