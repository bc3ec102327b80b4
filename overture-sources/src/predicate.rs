//! Row predicates pushed down into the Parquet scan.

use datafusion::{
    functions::core::expr_fn::get_field,
    prelude::{col, lit, Expr},
};

pub const ID_COLUMN: &str = "id";
pub const BBOX_COLUMN: &str = "bbox";
pub const BBOX_FIELDS: [&str; 4] = ["xmin", "ymin", "xmax", "ymax"];

/// Axis aligned box in geographic coordinates.
///
/// `xmin <= xmax` and `ymin <= ymax` are expected but not checked; callers own
/// the validity of the range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BoundingBox {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }

    /// Strict intersection: boxes that only share an edge do not intersect.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.xmin < other.xmax
            && self.xmax > other.xmin
            && self.ymin < other.ymax
            && self.ymax > other.ymin
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(value: [f64; 4]) -> Self {
        Self::new(value[0], value[1], value[2], value[3])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadPredicate {
    /// Stored `bbox` intersects the query box.
    Intersects(BoundingBox),
    /// Stored `bbox` equals the given box on all four bounds.
    BboxEquals(BoundingBox),
    IdEquals(String),
    /// String column equals a literal, e.g. `collection = 'building'`.
    ColumnEquals { column: String, value: String },
    And(Box<ReadPredicate>, Box<ReadPredicate>),
}

impl ReadPredicate {
    pub fn and(self, other: ReadPredicate) -> ReadPredicate {
        ReadPredicate::And(Box::new(self), Box::new(other))
    }

    /// Exact match used after a registry lookup. The bbox guards against id
    /// collisions across partitions.
    pub fn exact_feature(id: &str, bbox: BoundingBox) -> ReadPredicate {
        ReadPredicate::IdEquals(id.to_string()).and(ReadPredicate::BboxEquals(bbox))
    }

    pub fn column_equals(column: &str, value: &str) -> ReadPredicate {
        ReadPredicate::ColumnEquals {
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    pub fn to_expr(&self) -> Expr {
        match self {
            ReadPredicate::Intersects(query) => bbox_field("xmin")
                .lt(lit(query.xmax))
                .and(bbox_field("xmax").gt(lit(query.xmin)))
                .and(bbox_field("ymin").lt(lit(query.ymax)))
                .and(bbox_field("ymax").gt(lit(query.ymin))),
            ReadPredicate::BboxEquals(bbox) => bbox_field("xmin")
                .eq(lit(bbox.xmin))
                .and(bbox_field("ymin").eq(lit(bbox.ymin)))
                .and(bbox_field("xmax").eq(lit(bbox.xmax)))
                .and(bbox_field("ymax").eq(lit(bbox.ymax))),
            ReadPredicate::IdEquals(id) => col(ID_COLUMN).eq(lit(id.as_str())),
            ReadPredicate::ColumnEquals { column, value } => {
                col(column.as_str()).eq(lit(value.as_str()))
            }
            ReadPredicate::And(left, right) => left.to_expr().and(right.to_expr()),
        }
    }
}

fn bbox_field(name: &str) -> Expr {
    get_field(col(BBOX_COLUMN), name)
}
