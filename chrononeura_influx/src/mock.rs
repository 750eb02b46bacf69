//! A mock implementation of [`TimeSeriesStore`].

use std::collections::VecDeque;

use async_trait::async_trait;
use chrononeura_types::NormalizedRecord;
use parking_lot::Mutex;

use crate::{DataPoint, Precision, Query, Result, Row, TimeSeriesStore};

#[derive(Debug, Clone)]
pub enum MockStoreCall {
    Write {
        bucket: String,
        record: NormalizedRecord,
        precision: Precision,
    },
    Query {
        bucket: String,
        query: Query,
    },
    Health,
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<MockStoreCall>,
    write_return: VecDeque<Result<()>>,
    query_return: VecDeque<Result<Vec<Row>>>,
    health_return: VecDeque<Result<()>>,
}

/// Records every call and replays the configured return values in order.
/// When a return queue runs dry the call succeeds with an empty result.
#[derive(Debug, Default)]
pub struct MockTimeSeriesStore(Mutex<Inner>);

impl MockTimeSeriesStore {
    pub fn with_write_return(self, ret: impl Into<VecDeque<Result<()>>>) -> Self {
        self.0.lock().write_return = ret.into();
        self
    }

    pub fn with_query_return(self, ret: impl Into<VecDeque<Result<Vec<Row>>>>) -> Self {
        self.0.lock().query_return = ret.into();
        self
    }

    pub fn with_health_return(self, ret: impl Into<VecDeque<Result<()>>>) -> Self {
        self.0.lock().health_return = ret.into();
        self
    }

    pub fn calls(&self) -> Vec<MockStoreCall> {
        self.0.lock().calls.clone()
    }
}

#[async_trait]
impl TimeSeriesStore for MockTimeSeriesStore {
    async fn write_point(
        &self,
        bucket: &str,
        record: &NormalizedRecord,
        precision: Precision,
    ) -> Result<()> {
        // mirror the real client, which rejects bad timestamps before sending
        DataPoint::new(record, precision)?;

        let mut guard = self.0.lock();
        guard.calls.push(MockStoreCall::Write {
            bucket: bucket.to_string(),
            record: record.clone(),
            precision,
        });
        guard.write_return.pop_front().unwrap_or(Ok(()))
    }

    async fn query(&self, bucket: &str, query: &Query) -> Result<Vec<Row>> {
        // mirror the real client, which rejects bad queries before sending
        query.to_flux(bucket)?;

        let mut guard = self.0.lock();
        guard.calls.push(MockStoreCall::Query {
            bucket: bucket.to_string(),
            query: query.clone(),
        });
        guard.query_return.pop_front().unwrap_or(Ok(vec![]))
    }

    async fn health(&self) -> Result<()> {
        let mut guard = self.0.lock();
        guard.calls.push(MockStoreCall::Health);
        guard.health_return.pop_front().unwrap_or(Ok(()))
    }
}
