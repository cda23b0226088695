// src/classify/codes.rs

//! SQLSTATE to [`ErrorKind`] table.
//!
//! Codes follow the SQL standard layout: the first two characters name the
//! class, the remaining three the condition. Only conditions with a dedicated
//! kind are listed; anything else resolves to [`ErrorKind::Unknown`].
//! Reference: <https://www.postgresql.org/docs/current/errcodes-appendix.html>

use super::ErrorKind;

/// Map a SQLSTATE code to its kind. Matching is case-insensitive.
pub fn kind_for_code(code: &str) -> ErrorKind {
    let code = code.to_ascii_uppercase();
    match code.as_str() {
        // Class 08 - Connection Exception
        "08000" | "08001" | "08P01" => ErrorKind::ConnectionFailed,
        "08003" | "08006" | "08007" => ErrorKind::ConnectionLost,
        "08004" => ErrorKind::ConnectionRefused,

        // Class 22 - Data Exception
        "22000" | "22005" => ErrorKind::DataTypeMismatch,
        "22001" => ErrorKind::StringTruncation,
        "22003" => ErrorKind::NumericOutOfRange,
        "22007" | "22008" => ErrorKind::InvalidDatetimeFormat,
        "22012" => ErrorKind::DivisionByZero,
        "22P02" => ErrorKind::InvalidTextRepresentation,

        // Class 23 - Integrity Constraint Violation
        "23000" | "23514" => ErrorKind::CheckViolation,
        "23001" | "23503" => ErrorKind::ForeignKeyViolation,
        "23502" => ErrorKind::NotNullViolation,
        "23505" => ErrorKind::UniqueViolation,

        // Class 25 - Invalid Transaction State
        "25000" | "25001" | "25006" | "25P01" => ErrorKind::InvalidTransactionState,
        "25P02" => ErrorKind::TransactionAborted,

        // Class 28 - Invalid Authorization Specification
        "28000" | "28P01" => ErrorKind::AuthenticationFailed,

        // Class 40 - Transaction Rollback
        "40000" | "40002" | "40003" => ErrorKind::TransactionRollback,
        "40001" => ErrorKind::SerializationFailure,
        "40P01" => ErrorKind::DeadlockDetected,

        // Class 42 - Syntax Error or Access Rule Violation
        "42000" | "42601" => ErrorKind::SyntaxError,
        "42501" => ErrorKind::InsufficientPrivilege,
        "42P01" => ErrorKind::UndefinedTable,
        "42703" => ErrorKind::UndefinedColumn,
        "42883" => ErrorKind::UndefinedFunction,
        "42804" | "42846" => ErrorKind::DataTypeMismatch,

        // Class 53 - Insufficient Resources
        "53000" | "53200" => ErrorKind::InsufficientMemory,
        "53100" => ErrorKind::DiskFull,
        "53300" => ErrorKind::PoolExhausted,
        "53400" => ErrorKind::SystemError,

        // Class 57 - Operator Intervention
        "57P01" | "57P02" => ErrorKind::ConnectionLost,
        "57P03" => ErrorKind::ConnectionRefused,

        // Class 58 - System Error, Class XX - Internal Error
        "58000" | "58030" | "XX000" => ErrorKind::SystemError,

        _ => ErrorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_listed_code() {
        let table = [
            ("08000", ErrorKind::ConnectionFailed),
            ("08001", ErrorKind::ConnectionFailed),
            ("08P01", ErrorKind::ConnectionFailed),
            ("08003", ErrorKind::ConnectionLost),
            ("08006", ErrorKind::ConnectionLost),
            ("08007", ErrorKind::ConnectionLost),
            ("08004", ErrorKind::ConnectionRefused),
            ("22000", ErrorKind::DataTypeMismatch),
            ("22005", ErrorKind::DataTypeMismatch),
            ("22001", ErrorKind::StringTruncation),
            ("22003", ErrorKind::NumericOutOfRange),
            ("22007", ErrorKind::InvalidDatetimeFormat),
            ("22008", ErrorKind::InvalidDatetimeFormat),
            ("22012", ErrorKind::DivisionByZero),
            ("22P02", ErrorKind::InvalidTextRepresentation),
            ("23000", ErrorKind::CheckViolation),
            ("23514", ErrorKind::CheckViolation),
            ("23001", ErrorKind::ForeignKeyViolation),
            ("23503", ErrorKind::ForeignKeyViolation),
            ("23502", ErrorKind::NotNullViolation),
            ("23505", ErrorKind::UniqueViolation),
            ("25000", ErrorKind::InvalidTransactionState),
            ("25001", ErrorKind::InvalidTransactionState),
            ("25006", ErrorKind::InvalidTransactionState),
            ("25P01", ErrorKind::InvalidTransactionState),
            ("25P02", ErrorKind::TransactionAborted),
            ("28000", ErrorKind::AuthenticationFailed),
            ("28P01", ErrorKind::AuthenticationFailed),
            ("40000", ErrorKind::TransactionRollback),
            ("40002", ErrorKind::TransactionRollback),
            ("40003", ErrorKind::TransactionRollback),
            ("40001", ErrorKind::SerializationFailure),
            ("40P01", ErrorKind::DeadlockDetected),
            ("42000", ErrorKind::SyntaxError),
            ("42601", ErrorKind::SyntaxError),
            ("42501", ErrorKind::InsufficientPrivilege),
            ("42P01", ErrorKind::UndefinedTable),
            ("42703", ErrorKind::UndefinedColumn),
            ("42883", ErrorKind::UndefinedFunction),
            ("42804", ErrorKind::DataTypeMismatch),
            ("42846", ErrorKind::DataTypeMismatch),
            ("53000", ErrorKind::InsufficientMemory),
            ("53200", ErrorKind::InsufficientMemory),
            ("53100", ErrorKind::DiskFull),
            ("53300", ErrorKind::PoolExhausted),
            ("53400", ErrorKind::SystemError),
            ("57P01", ErrorKind::ConnectionLost),
            ("57P02", ErrorKind::ConnectionLost),
            ("57P03", ErrorKind::ConnectionRefused),
            ("58000", ErrorKind::SystemError),
            ("58030", ErrorKind::SystemError),
            ("XX000", ErrorKind::SystemError),
        ];

        for (code, expected) in table {
            assert_eq!(kind_for_code(code), expected, "code {}", code);
        }
    }

    #[test]
    fn test_unmapped_codes_are_unknown() {
        for code in ["99999", "22P99", "0A000", "", "4000"] {
            assert_eq!(kind_for_code(code), ErrorKind::Unknown, "code {:?}", code);
        }
    }

    #[test]
    fn test_lowercase_codes() {
        assert_eq!(kind_for_code("40p01"), ErrorKind::DeadlockDetected);
        assert_eq!(kind_for_code("42p01"), ErrorKind::UndefinedTable);
    }
}
