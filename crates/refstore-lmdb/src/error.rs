use refstore_core::StoreError;

/// Lift an LMDB error into the store taxonomy, attaching the operation and
/// (when known) the table.
pub(crate) fn engine_error(err: lmdb::Error, op: &'static str, table: Option<&str>) -> StoreError {
    let context = match table {
        Some(table) => format!("{op} on table '{table}'"),
        None => op.to_string(),
    };
    match err {
        lmdb::Error::MapFull => StoreError::ResourceExhausted(format!(
            "map full during {context}; raise max_size_bytes"
        )),
        lmdb::Error::ReadersFull => StoreError::ResourceExhausted(format!(
            "engine reader table full during {context}"
        )),
        lmdb::Error::DbsFull => StoreError::ResourceExhausted(format!(
            "table limit reached during {context}; raise max_tables"
        )),
        lmdb::Error::TxnFull => StoreError::ResourceExhausted(format!(
            "transaction has too many dirty pages during {context}"
        )),
        lmdb::Error::BadRslot => StoreError::InvalidState(format!(
            "thread already holds a read transaction ({context}); \
             enable thread_unconstrained to hold several"
        )),
        lmdb::Error::Incompatible => StoreError::Config(format!(
            "table flags incompatible with the stored table ({context})"
        )),
        other => StoreError::Engine {
            op,
            table: table.map(str::to_owned),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_kinds() {
        for err in [
            lmdb::Error::MapFull,
            lmdb::Error::ReadersFull,
            lmdb::Error::DbsFull,
            lmdb::Error::TxnFull,
        ] {
            assert!(engine_error(err, "put", Some("t")).is_resource_exhausted());
        }
    }

    #[test]
    fn test_other_errors_keep_context() {
        let err = engine_error(lmdb::Error::Corrupted, "get", Some("zones"));
        match err {
            StoreError::Engine { op, table, .. } => {
                assert_eq!(op, "get");
                assert_eq!(table.as_deref(), Some("zones"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
