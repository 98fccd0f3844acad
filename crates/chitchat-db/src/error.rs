use rusqlite::ErrorCode;

/// A write collided with a UNIQUE column, e.g. a username or email that
/// another account already holds.
#[derive(Debug, thiserror::Error)]
#[error("{field} already taken")]
pub struct Duplicate {
    pub field: String,
}

/// Turn a UNIQUE violation into `Duplicate`; pass anything else through.
pub(crate) fn unique_violation(err: rusqlite::Error) -> anyhow::Error {
    if let rusqlite::Error::SqliteFailure(code, Some(msg)) = &err {
        if code.code == ErrorCode::ConstraintViolation
            && code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        {
            // "UNIQUE constraint failed: users.email"
            let field = msg
                .rsplit(['.', ' '])
                .next()
                .unwrap_or("value")
                .to_string();
            return Duplicate { field }.into();
        }
    }
    err.into()
}
