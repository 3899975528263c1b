//! Declarative reference queries.
//!
//! Callers describe what they need; stores decide how to run it. A query
//! never carries SQL.

use std::fmt;

use nrf_spatial::{FeatureSet, MultiPolygon};
use serde_json::{Map, Value};

/// Spatial reference layers published to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerKind {
    WwtwCatchments,
    LpaBoundaries,
    NnCatchments,
    Subcatchments,
    GcnRiskZones,
    GcnPonds,
    EdpEdges,
}

impl LayerKind {
    pub const ALL: [LayerKind; 7] = [
        LayerKind::WwtwCatchments,
        LayerKind::LpaBoundaries,
        LayerKind::NnCatchments,
        LayerKind::Subcatchments,
        LayerKind::GcnRiskZones,
        LayerKind::GcnPonds,
        LayerKind::EdpEdges,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::WwtwCatchments => "wwtw_catchments",
            LayerKind::LpaBoundaries => "lpa_boundaries",
            LayerKind::NnCatchments => "nn_catchments",
            LayerKind::Subcatchments => "subcatchments",
            LayerKind::GcnRiskZones => "gcn_risk_zones",
            LayerKind::GcnPonds => "gcn_ponds",
            LayerKind::EdpEdges => "edp_edges",
        }
    }
}

/// Where a query reads from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    Layer(LayerKind),
    /// Land use coefficient polygons.
    Coefficients,
    /// Named tabular lookup without geometry.
    Lookup(String),
}

impl Source {
    pub fn lookup(name: impl Into<String>) -> Self {
        Source::Lookup(name.into())
    }

    /// Storage name; also the key version pins are cached under.
    pub fn name(&self) -> String {
        match self {
            Source::Layer(kind) => kind.as_str().to_string(),
            Source::Coefficients => "coefficients".to_string(),
            Source::Lookup(name) => format!("lookup:{name}"),
        }
    }

    pub fn has_geometry(&self) -> bool {
        !matches!(self, Source::Lookup(_))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionPin {
    #[default]
    Latest,
    Exact(i64),
}

impl fmt::Display for VersionPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionPin::Latest => f.write_str("latest"),
            VersionPin::Exact(v) => write!(f, "{v}"),
        }
    }
}

/// Spatial restriction on stored geometry. Touching counts as intersecting.
#[derive(Debug, Clone, PartialEq)]
pub enum SpatialPredicate {
    Intersects(MultiPolygon<f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeFilter {
    pub column: String,
    pub equals: Value,
}

impl AttributeFilter {
    /// Equality with numbers compared by value, so `141` matches `141.0`.
    pub fn matches(&self, attributes: &Map<String, Value>) -> bool {
        match (attributes.get(&self.column), &self.equals) {
            (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
            (Some(actual), expected) => actual == expected,
            (None, _) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Attribute columns to return; `None` returns all of them.
    pub columns: Option<Vec<String>>,
    pub geometry: bool,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            columns: None,
            geometry: true,
        }
    }
}

impl Projection {
    pub fn apply(&self, attributes: Map<String, Value>) -> Map<String, Value> {
        match &self.columns {
            None => attributes,
            Some(columns) => attributes
                .into_iter()
                .filter(|(key, _)| columns.iter().any(|c| c == key))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Features,
    Rows,
}

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub source: Source,
    pub version: VersionPin,
    pub predicate: Option<SpatialPredicate>,
    pub filters: Vec<AttributeFilter>,
    pub projection: Projection,
    pub output: Output,
}

impl Query {
    pub fn features(source: Source) -> Self {
        Self {
            source,
            version: VersionPin::Latest,
            predicate: None,
            filters: Vec::new(),
            projection: Projection::default(),
            output: Output::Features,
        }
    }

    pub fn rows(source: Source) -> Self {
        Self {
            output: Output::Rows,
            projection: Projection {
                columns: None,
                geometry: false,
            },
            ..Self::features(source)
        }
    }

    pub fn layer(kind: LayerKind) -> Self {
        Self::features(Source::Layer(kind))
    }

    pub fn lookup(name: impl Into<String>) -> Self {
        Self::rows(Source::lookup(name))
    }

    pub fn version(mut self, pin: VersionPin) -> Self {
        self.version = pin;
        self
    }

    pub fn intersecting(mut self, geometry: MultiPolygon<f64>) -> Self {
        self.predicate = Some(SpatialPredicate::Intersects(geometry));
        self
    }

    pub fn filter(mut self, column: impl Into<String>, equals: impl Into<Value>) -> Self {
        self.filters.push(AttributeFilter {
            column: column.into(),
            equals: equals.into(),
        });
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn without_geometry(mut self) -> Self {
        self.projection.geometry = false;
        self
    }

    /// Whether the statement this query describes selects a geometry column.
    pub fn selects_geometry(&self) -> bool {
        self.source.has_geometry() && self.projection.geometry
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Features(FeatureSet),
    Rows(Vec<Row>),
}

impl QueryResult {
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Features(set) => set.len(),
            QueryResult::Rows(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_features(self) -> Option<FeatureSet> {
        match self {
            QueryResult::Features(set) => Some(set),
            QueryResult::Rows(_) => None,
        }
    }

    /// Rows of either kind; features yield their attributes.
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            QueryResult::Features(set) => set.features.into_iter().map(|f| f.attributes).collect(),
            QueryResult::Rows(rows) => rows,
        }
    }
}
