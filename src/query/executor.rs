use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;

use crate::core::error::Result;
use crate::core::types::{CancellationToken, Deadline};
use crate::query::predicate::Predicate;
use crate::serialization::{record_from_value, Record, WireFormat};
use crate::storage::shard::Shard;

/// Lazy stream of decoded records matching a query.
///
/// Candidates arrive either from an index probe (individual encoded
/// records, already in ascending key order) or from shard payloads
/// (decoded one shard at a time, in shard insertion order). Every
/// predicate is re-applied before a record is yielded, so each strategy
/// returns the same set. The first decode failure, cancellation or missed
/// deadline terminates the stream.
pub struct DocumentStream<T> {
    source: StreamSource,
    predicates: Vec<Predicate>,
    cancel: CancellationToken,
    deadline: Deadline,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

enum StreamSource {
    Index {
        format: WireFormat,
        records: std::vec::IntoIter<Vec<u8>>,
    },
    Shards {
        pending: std::vec::IntoIter<Arc<Shard>>,
        current: Option<std::vec::IntoIter<Value>>,
    },
}

impl<T: Record> DocumentStream<T> {
    pub(crate) fn over_index(
        format: WireFormat,
        records: Vec<Vec<u8>>,
        predicates: Vec<Predicate>,
        cancel: CancellationToken,
        deadline: Deadline,
    ) -> Self {
        DocumentStream {
            source: StreamSource::Index {
                format,
                records: records.into_iter(),
            },
            predicates,
            cancel,
            deadline,
            finished: false,
            _marker: PhantomData,
        }
    }

    pub(crate) fn over_shards(
        shards: Vec<Arc<Shard>>,
        predicates: Vec<Predicate>,
        cancel: CancellationToken,
        deadline: Deadline,
    ) -> Self {
        DocumentStream {
            source: StreamSource::Shards {
                pending: shards.into_iter(),
                current: None,
            },
            predicates,
            cancel,
            deadline,
            finished: false,
            _marker: PhantomData,
        }
    }

    fn fail(&mut self, err: crate::core::error::Error) -> Option<Result<T>> {
        self.finished = true;
        Some(Err(err))
    }
}

impl<T: Record> Iterator for DocumentStream<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            if let Err(err) = self.cancel.check().and_then(|()| self.deadline.check()) {
                return self.fail(err);
            }

            let value = match &mut self.source {
                StreamSource::Index { format, records } => match records.next() {
                    None => return None,
                    Some(bytes) => match format.decode_generic(&bytes) {
                        Ok(value) => value,
                        Err(err) => return self.fail(err),
                    },
                },
                StreamSource::Shards { pending, current } => {
                    match current.as_mut().and_then(|values| values.next()) {
                        Some(value) => value,
                        None => match pending.next() {
                            None => return None,
                            Some(shard) => match shard.load_values() {
                                Ok(values) => {
                                    *current = Some(values.into_iter());
                                    continue;
                                }
                                Err(err) => return self.fail(err),
                            },
                        },
                    }
                }
            };

            if self.predicates.iter().all(|p| p.matches(&value)) {
                return match record_from_value(value) {
                    Ok(record) => Some(Ok(record)),
                    Err(err) => self.fail(err),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::codec::Codec;
    use crate::query::predicate::Operator;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u32,
        name: String,
    }

    fn seeded_shard(dir: &tempfile::TempDir) -> Arc<Shard> {
        let shard = Shard::create(
            "default",
            dir.path().join("default.nyaru"),
            Codec::None,
            WireFormat::TagTree,
            None,
        )
        .unwrap();
        for (id, name) in [(1u32, "Alice"), (2, "Bob"), (3, "Alice")] {
            let bytes = WireFormat::TagTree
                .encode(&User {
                    id,
                    name: name.to_string(),
                })
                .unwrap();
            shard.append(&bytes, &[]).unwrap();
        }
        Arc::new(shard)
    }

    #[test]
    fn shard_stream_filters_and_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let shard = seeded_shard(&dir);
        let stream: DocumentStream<User> = DocumentStream::over_shards(
            vec![shard],
            vec![Predicate::new("name", Operator::equal("Alice"))],
            CancellationToken::new(),
            Deadline::unbounded(),
        );
        let users: Vec<User> = stream.collect::<Result<_>>().unwrap();
        assert_eq!(users.iter().map(|u| u.id).collect::<Vec<_>>(), [1, 3]);
    }

    #[test]
    fn cancelled_stream_yields_cancelled_then_stops() {
        let dir = tempfile::tempdir().unwrap();
        let shard = seeded_shard(&dir);
        let cancel = CancellationToken::new();
        let mut stream: DocumentStream<User> = DocumentStream::over_shards(
            vec![shard],
            Vec::new(),
            cancel.clone(),
            Deadline::unbounded(),
        );
        assert!(stream.next().unwrap().is_ok());
        cancel.cancel();
        assert!(matches!(
            stream.next(),
            Some(Err(crate::core::error::Error::Cancelled))
        ));
        assert!(stream.next().is_none());
    }

    #[test]
    fn index_stream_decodes_individual_records() {
        let records: Vec<Vec<u8>> = [(5u32, "Eve"), (6, "Mallory")]
            .iter()
            .map(|(id, name)| {
                WireFormat::TagTree
                    .encode(&User {
                        id: *id,
                        name: name.to_string(),
                    })
                    .unwrap()
            })
            .collect();
        let stream: DocumentStream<User> = DocumentStream::over_index(
            WireFormat::TagTree,
            records,
            Vec::new(),
            CancellationToken::new(),
            Deadline::unbounded(),
        );
        let users: Vec<User> = stream.collect::<Result<_>>().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].name, "Eve");
    }
}
