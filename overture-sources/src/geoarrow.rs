use std::{collections::HashMap, sync::Arc};

use arrow::datatypes::{Schema, SchemaRef};

pub const GEOMETRY_COLUMN: &str = "geometry";
pub const EXTENSION_NAME_KEY: &str = "ARROW:extension:name";
pub const GEOARROW_WKB: &str = "geoarrow.wkb";
/// Schema level key holding the GeoParquet metadata block.
pub const GEO_METADATA_KEY: &str = "geo";

/// Mark the `geometry` column as GeoArrow WKB.
///
/// Only field metadata changes, the data is untouched. Schemas without a
/// `geometry` column are returned as is. `geo_metadata` (the GeoParquet block
/// of the source files) is attached at schema level when present.
pub fn geoarrow_schema_adapter(schema: &Schema, geo_metadata: Option<String>) -> SchemaRef {
    let fields = schema
        .fields()
        .iter()
        .map(|field| {
            if field.name() == GEOMETRY_COLUMN {
                let mut metadata = field.metadata().clone();
                metadata.insert(EXTENSION_NAME_KEY.to_string(), GEOARROW_WKB.to_string());
                Arc::new(field.as_ref().clone().with_metadata(metadata))
            } else {
                field.clone()
            }
        })
        .collect::<Vec<_>>();

    let mut metadata: HashMap<String, String> = schema.metadata().clone();
    if let Some(geo) = geo_metadata {
        metadata.insert(GEO_METADATA_KEY.to_string(), geo);
    }

    Arc::new(Schema::new_with_metadata(fields, metadata))
}

#[cfg(test)]
mod tests {
    use arrow::datatypes::{DataType, Field};

    use super::*;

    #[test]
    fn geometry_field_gets_extension_name() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("geometry", DataType::Binary, true),
        ]);

        let adapted = geoarrow_schema_adapter(&schema, Some("{}".to_string()));

        let geometry = adapted.field_with_name("geometry").unwrap();
        assert_eq!(
            geometry.metadata().get(EXTENSION_NAME_KEY).map(String::as_str),
            Some(GEOARROW_WKB)
        );
        assert!(adapted.field_with_name("id").unwrap().metadata().is_empty());
        assert_eq!(adapted.metadata().get(GEO_METADATA_KEY).unwrap(), "{}");
        assert_eq!(geometry.data_type(), &DataType::Binary);
    }

    #[test]
    fn schema_without_geometry_is_unchanged() {
        let schema = Schema::new(vec![Field::new("id", DataType::Utf8, false)]);
        let adapted = geoarrow_schema_adapter(&schema, None);
        assert_eq!(adapted.as_ref(), &schema);
    }
}
