use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use arrow::{
    array::{Array, ArrayRef, BinaryArray, Float64Array, StringArray, StructArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use bytes::Bytes;
use datafusion::prelude::SessionContext;
use futures::{stream::BoxStream, StreamExt};
use object_store::{
    memory::InMemory, path::Path, GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta,
    ObjectStore, PutMultipartOpts, PutOptions, PutPayload, PutResult,
};
use overture_sources::{
    geoarrow::{EXTENSION_NAME_KEY, GEOARROW_WKB, GEO_METADATA_KEY},
    session_config, BoundingBox, DatasetReader, DatasetSource, ReadPredicate, ReaderError,
};
use parquet::{arrow::ArrowWriter, file::properties::WriterProperties, format::KeyValue};
use url::Url;

const BUCKET: &str = "overturemaps-us-west-2";
const PARTITION: &str = "release/2025-10-22.0/theme=places/type=place";

fn wkb_point(x: f64, y: f64) -> Vec<u8> {
    let mut wkb = vec![1u8];
    wkb.extend_from_slice(&1u32.to_le_bytes());
    wkb.extend_from_slice(&x.to_le_bytes());
    wkb.extend_from_slice(&y.to_le_bytes());
    wkb
}

fn bbox_field() -> Field {
    Field::new(
        "bbox",
        DataType::Struct(
            ["xmin", "ymin", "xmax", "ymax"]
                .into_iter()
                .map(|name| Field::new(name, DataType::Float64, false))
                .collect(),
        ),
        true,
    )
}

/// One point feature per `(id, x, y)`; the stored bbox is the point itself.
fn place_batch(rows: &[(&str, f64, f64)]) -> RecordBatch {
    let geo = r#"{"version":"1.0.0","primary_column":"geometry","columns":{"geometry":{"encoding":"WKB","geometry_types":["Point"],"bbox":[0,0,1,1]}}}"#;
    let schema = Arc::new(Schema::new_with_metadata(
        vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("geometry", DataType::Binary, true),
            bbox_field(),
        ],
        HashMap::from([(GEO_METADATA_KEY.to_string(), geo.to_string())]),
    ));

    let xs: ArrayRef = Arc::new(Float64Array::from(
        rows.iter().map(|r| r.1).collect::<Vec<_>>(),
    ));
    let ys: ArrayRef = Arc::new(Float64Array::from(
        rows.iter().map(|r| r.2).collect::<Vec<_>>(),
    ));
    let DataType::Struct(bbox_fields) = bbox_field().data_type().clone() else {
        unreachable!()
    };
    let bbox = StructArray::new(
        bbox_fields,
        vec![xs.clone(), ys.clone(), xs, ys],
        None,
    );

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.0).collect::<Vec<_>>(),
            )),
            Arc::new(BinaryArray::from_iter_values(
                rows.iter().map(|r| wkb_point(r.1, r.2)),
            )),
            Arc::new(bbox),
        ],
    )
    .unwrap()
}

async fn put_parquet(store: &InMemory, path: &str, batch: &RecordBatch) {
    let geo = batch.schema().metadata().get(GEO_METADATA_KEY).cloned();
    let props = WriterProperties::builder()
        .set_key_value_metadata(Some(vec![KeyValue::new(GEO_METADATA_KEY.to_string(), geo)]))
        .build();
    let mut buffer = vec![];
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props)).unwrap();
    writer.write(batch).unwrap();
    writer.close().unwrap();
    store
        .put(&Path::from(path), Bytes::from(buffer).into())
        .await
        .unwrap();
}

async fn reader_with(store: Arc<dyn ObjectStore>, batch_size: usize) -> DatasetReader {
    let ctx = SessionContext::new_with_config(session_config(batch_size));
    ctx.register_object_store(&Url::parse(&format!("s3://{BUCKET}")).unwrap(), store);
    DatasetReader::new(Arc::new(ctx))
}

async fn seeded_store() -> Arc<InMemory> {
    let store = Arc::new(InMemory::new());
    put_parquet(
        &store,
        &format!("{PARTITION}/part-00000.parquet"),
        &place_batch(&[("a", 1.0, 1.0), ("b", 5.0, 5.0), ("c", 10.0, 5.0)]),
    )
    .await;
    put_parquet(
        &store,
        &format!("{PARTITION}/part-00001.parquet"),
        &place_batch(&[("d", 50.0, 50.0), ("e", 60.0, 60.0), ("f", 70.0, 70.0)]),
    )
    .await;
    store
}

/// Wraps a store so that reads time out once `unreachable` is set. Listing
/// keeps working, like a bucket whose data requests stall.
#[derive(Debug)]
struct StallingStore {
    inner: Arc<InMemory>,
    unreachable: AtomicBool,
}

impl StallingStore {
    fn new(inner: Arc<InMemory>) -> Self {
        Self {
            inner,
            unreachable: AtomicBool::new(false),
        }
    }

    fn stall(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }
}

impl fmt::Display for StallingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StallingStore({})", self.inner)
    }
}

#[async_trait::async_trait]
impl ObjectStore for StallingStore {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> object_store::Result<PutResult> {
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> object_store::Result<Box<dyn MultipartUpload>> {
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(
        &self,
        location: &Path,
        options: GetOptions,
    ) -> object_store::Result<GetResult> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(object_store::Error::Generic {
                store: "S3",
                source: format!("request for {location} timed out").into(),
            });
        }
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &Path) -> object_store::Result<()> {
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(&self, prefix: Option<&Path>) -> object_store::Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}

async fn collect_ids(stream: overture_sources::BatchStream) -> Vec<String> {
    let batches = stream.collect_batches().await.unwrap();
    let mut ids = vec![];
    for batch in batches {
        assert!(batch.num_rows() > 0, "empty batch reached the caller");
        let column = batch.column_by_name("id").unwrap();
        let column = column.as_any().downcast_ref::<StringArray>().unwrap();
        ids.extend(column.iter().flatten().map(str::to_string));
    }
    ids.sort();
    ids
}

#[tokio::test]
async fn bbox_predicate_keeps_only_intersecting_rows() {
    let reader = reader_with(seeded_store().await, 2).await;
    let source = DatasetSource::Partition(format!("{BUCKET}/{PARTITION}/"));
    let predicate = ReadPredicate::Intersects(BoundingBox::new(0.0, 0.0, 10.0, 10.0));

    let stream = reader.open(&source, Some(&predicate)).await.unwrap();

    // "c" sits on the query's right edge and is excluded by the strict test.
    assert_eq!(collect_ids(stream).await, vec!["a", "b"]);
}

#[tokio::test]
async fn no_predicate_streams_the_whole_partition() {
    let reader = reader_with(seeded_store().await, 2).await;
    let source = DatasetSource::Partition(format!("{BUCKET}/{PARTITION}/"));

    let stream = reader.open(&source, None).await.unwrap();

    assert_eq!(collect_ids(stream).await, vec!["a", "b", "c", "d", "e", "f"]);
}

#[tokio::test]
async fn selective_predicate_never_yields_empty_batches() {
    let reader = reader_with(seeded_store().await, 1).await;
    let source = DatasetSource::Partition(format!("{BUCKET}/{PARTITION}/"));
    let predicate = ReadPredicate::Intersects(BoundingBox::new(59.0, 59.0, 61.0, 61.0));

    let mut stream = reader.open(&source, Some(&predicate)).await.unwrap();
    let mut rows = 0;
    while let Some(batch) = stream.next().await {
        let batch = batch.unwrap();
        assert!(batch.num_rows() > 0);
        rows += batch.num_rows();
    }
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn schema_is_annotated_as_geoarrow() {
    let reader = reader_with(seeded_store().await, 2).await;
    let source = DatasetSource::Files(vec![format!("{BUCKET}/{PARTITION}/part-00001.parquet")]);

    let stream = reader.open(&source, None).await.unwrap();
    let schema = stream.schema();

    let geometry = schema.field_with_name("geometry").unwrap();
    assert_eq!(
        geometry.metadata().get(EXTENSION_NAME_KEY).map(String::as_str),
        Some(GEOARROW_WKB)
    );
    assert!(schema.metadata().contains_key(GEO_METADATA_KEY));

    let batches = stream.collect_batches().await.unwrap();
    assert!(batches.iter().all(|b| b.schema() == schema));
    assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 3);
}

#[tokio::test]
async fn explicit_file_list_reads_only_those_files() {
    let reader = reader_with(seeded_store().await, 8).await;
    let source = DatasetSource::Files(vec![format!("{BUCKET}/{PARTITION}/part-00000.parquet")]);

    let stream = reader.open(&source, None).await.unwrap();

    assert_eq!(collect_ids(stream).await, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn id_and_bbox_equality_selects_one_feature() {
    let reader = reader_with(seeded_store().await, 8).await;
    let source = DatasetSource::Partition(format!("{BUCKET}/{PARTITION}/"));
    let predicate = ReadPredicate::exact_feature("e", BoundingBox::new(60.0, 60.0, 60.0, 60.0));

    let stream = reader.open(&source, Some(&predicate)).await.unwrap();
    assert_eq!(collect_ids(stream).await, vec!["e"]);

    let wrong_box = ReadPredicate::exact_feature("e", BoundingBox::new(0.0, 0.0, 1.0, 1.0));
    let stream = reader.open(&source, Some(&wrong_box)).await.unwrap();
    assert!(collect_ids(stream).await.is_empty());
}

#[tokio::test]
async fn missing_partition_is_reported() {
    let reader = reader_with(Arc::new(InMemory::new()), 8).await;
    let source = DatasetSource::Partition(format!("{BUCKET}/release/nope/theme=x/type=y/"));

    let err = reader.open(&source, None).await.unwrap_err();

    assert!(matches!(err, ReaderError::NoDataFiles(_)), "unexpected error {err}");
}

#[tokio::test]
async fn empty_file_list_is_reported() {
    let reader = reader_with(seeded_store().await, 8).await;

    let err = reader.open(&DatasetSource::Files(vec![]), None).await.unwrap_err();

    assert!(matches!(err, ReaderError::NoDataFiles(_)), "unexpected error {err}");
}

#[tokio::test]
async fn timed_out_reads_fail_open_as_connection_errors() {
    let store = Arc::new(StallingStore::new(seeded_store().await));
    let reader = reader_with(store.clone(), 8).await;
    let source = DatasetSource::Partition(format!("{BUCKET}/{PARTITION}/"));

    store.stall();
    let err = reader.open(&source, None).await.unwrap_err();

    assert!(err.is_connection(), "unexpected error {err}");
}

#[tokio::test]
async fn timed_out_reads_fail_the_stream_as_connection_errors() {
    let store = Arc::new(StallingStore::new(seeded_store().await));
    let reader = reader_with(store.clone(), 8).await;
    let source = DatasetSource::Partition(format!("{BUCKET}/{PARTITION}/"));
    let predicate = ReadPredicate::Intersects(BoundingBox::new(0.0, 0.0, 100.0, 100.0));

    let mut stream = reader.open(&source, Some(&predicate)).await.unwrap();
    store.stall();

    let err = match stream.next().await {
        Some(Err(err)) => err,
        other => panic!("expected a failed read, got {other:?}"),
    };
    assert!(err.is_connection(), "unexpected error {err}");
}

#[tokio::test]
async fn unregistered_store_is_an_open_failure() {
    let ctx = SessionContext::new_with_config(session_config(8));
    let reader = DatasetReader::new(Arc::new(ctx));
    let source = DatasetSource::Files(vec!["some-other-bucket/file.parquet".to_string()]);

    let err = reader.open(&source, None).await.unwrap_err();
    assert!(matches!(err, ReaderError::Open { .. }), "unexpected error {err}");
}
