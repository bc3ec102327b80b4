use std::{
    pin::Pin,
    task::{Context, Poll},
};

use arrow::{datatypes::SchemaRef, record_batch::RecordBatch};
use datafusion::execution::SendableRecordBatchStream;
use futures::{ready, Stream, StreamExt};

use crate::error::{ReaderError, ReaderResult};

/// Drops zero-row batches from the wrapped stream.
///
/// Scans with a selective predicate produce many empty batches; writers must
/// never see them. Relative order of the remaining batches is preserved.
pub struct NonEmptyBatches<S> {
    inner: S,
    skipped: usize,
}

impl<S> NonEmptyBatches<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, skipped: 0 }
    }

    /// Number of empty batches dropped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<S, E> Stream for NonEmptyBatches<S>
where
    S: Stream<Item = Result<RecordBatch, E>> + Unpin,
{
    type Item = Result<RecordBatch, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(self.inner.poll_next_unpin(cx)) {
                Some(Ok(batch)) if batch.num_rows() == 0 => {
                    self.skipped += 1;
                }
                other => return Poll::Ready(other),
            }
        }
    }
}

/// Lazy, single-pass sequence of non-empty batches carrying the annotated
/// dataset schema. Re-open the dataset to read it again.
pub struct BatchStream {
    schema: SchemaRef,
    location: String,
    inner: NonEmptyBatches<SendableRecordBatchStream>,
}

impl BatchStream {
    pub fn new(schema: SchemaRef, location: String, inner: SendableRecordBatchStream) -> Self {
        Self {
            schema,
            location,
            inner: NonEmptyBatches::new(inner),
        }
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Dataset path(s) this stream reads from.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn skipped_empty_batches(&self) -> usize {
        self.inner.skipped()
    }

    /// Collect the remaining batches. Meant for small results (lookups, the
    /// spatial index); large extracts should be streamed.
    pub async fn collect_batches(mut self) -> ReaderResult<Vec<RecordBatch>> {
        let mut batches = vec![];
        while let Some(batch) = self.next().await {
            batches.push(batch?);
        }
        Ok(batches)
    }
}

impl Stream for BatchStream {
    type Item = ReaderResult<RecordBatch>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match ready!(this.inner.poll_next_unpin(cx)) {
            Some(Ok(batch)) => Poll::Ready(Some(
                RecordBatch::try_new(this.schema.clone(), batch.columns().to_vec())
                    .map_err(ReaderError::SchemaMismatch),
            )),
            Some(Err(e)) => Poll::Ready(Some(Err(ReaderError::stream(&this.location, e)))),
            None => Poll::Ready(None),
        }
    }
}

impl std::fmt::Debug for BatchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchStream")
            .field("location", &self.location)
            .field("schema", &self.schema)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{convert::Infallible, sync::Arc};

    use arrow::{
        array::Int32Array,
        datatypes::{DataType, Field, Schema},
    };
    use futures::stream;

    use super::*;

    fn batch(rows: i32) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int32, false)]));
        let values = Int32Array::from((0..rows).map(|_| rows).collect::<Vec<_>>());
        RecordBatch::try_new(schema, vec![Arc::new(values)]).unwrap()
    }

    #[tokio::test]
    async fn empty_batches_are_dropped_in_order() {
        let input = vec![batch(0), batch(10), batch(0), batch(5), batch(0)];
        let mut filtered = NonEmptyBatches::new(stream::iter(
            input.into_iter().map(Ok::<_, Infallible>),
        ));

        let mut sizes = vec![];
        while let Some(batch) = filtered.next().await {
            sizes.push(batch.unwrap().num_rows());
        }

        assert_eq!(sizes, vec![10, 5]);
        assert_eq!(filtered.skipped(), 3);
    }

    #[tokio::test]
    async fn errors_pass_through() {
        let input: Vec<Result<RecordBatch, &str>> = vec![Ok(batch(0)), Err("boom"), Ok(batch(2))];
        let results = NonEmptyBatches::new(stream::iter(input))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap_err(), &"boom");
        assert_eq!(results[1].as_ref().unwrap().num_rows(), 2);
    }
}
