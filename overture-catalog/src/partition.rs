use std::{fmt::Display, str::FromStr};

use crate::error::CatalogError;

/// Top level partition of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Theme {
    Addresses,
    Base,
    Buildings,
    Divisions,
    Places,
    Transportation,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Addresses => "addresses",
            Theme::Base => "base",
            Theme::Buildings => "buildings",
            Theme::Divisions => "divisions",
            Theme::Places => "places",
            Theme::Transportation => "transportation",
        }
    }
}

impl Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub partition of a theme. Every type belongs to exactly one theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureType {
    Address,
    Bathymetry,
    Building,
    BuildingPart,
    Division,
    DivisionArea,
    DivisionBoundary,
    Place,
    Segment,
    Connector,
    Infrastructure,
    Land,
    LandCover,
    LandUse,
    Water,
}

impl FeatureType {
    pub const ALL: [FeatureType; 15] = [
        FeatureType::Address,
        FeatureType::Bathymetry,
        FeatureType::Building,
        FeatureType::BuildingPart,
        FeatureType::Division,
        FeatureType::DivisionArea,
        FeatureType::DivisionBoundary,
        FeatureType::Place,
        FeatureType::Segment,
        FeatureType::Connector,
        FeatureType::Infrastructure,
        FeatureType::Land,
        FeatureType::LandCover,
        FeatureType::LandUse,
        FeatureType::Water,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureType::Address => "address",
            FeatureType::Bathymetry => "bathymetry",
            FeatureType::Building => "building",
            FeatureType::BuildingPart => "building_part",
            FeatureType::Division => "division",
            FeatureType::DivisionArea => "division_area",
            FeatureType::DivisionBoundary => "division_boundary",
            FeatureType::Place => "place",
            FeatureType::Segment => "segment",
            FeatureType::Connector => "connector",
            FeatureType::Infrastructure => "infrastructure",
            FeatureType::Land => "land",
            FeatureType::LandCover => "land_cover",
            FeatureType::LandUse => "land_use",
            FeatureType::Water => "water",
        }
    }

    pub fn theme(&self) -> Theme {
        match self {
            FeatureType::Address => Theme::Addresses,
            FeatureType::Bathymetry
            | FeatureType::Infrastructure
            | FeatureType::Land
            | FeatureType::LandCover
            | FeatureType::LandUse
            | FeatureType::Water => Theme::Base,
            FeatureType::Building | FeatureType::BuildingPart => Theme::Buildings,
            FeatureType::Division | FeatureType::DivisionArea | FeatureType::DivisionBoundary => {
                Theme::Divisions
            }
            FeatureType::Place => Theme::Places,
            FeatureType::Segment | FeatureType::Connector => Theme::Transportation,
        }
    }
}

impl FromStr for FeatureType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureType::ALL
            .into_iter()
            .find(|feature_type| feature_type.as_str() == s)
            .ok_or_else(|| CatalogError::UnknownType(s.to_string()))
    }
}

impl Display for FeatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<bucket>/release/<release>`, the root every partition and registry path
/// of a release hangs off.
pub fn release_root(bucket: &str, release: &str) -> String {
    format!("{bucket}/release/{release}")
}

/// Partition directory of `feature_type` in `release`. Pure, no I/O.
pub fn locate(bucket: &str, feature_type: FeatureType, release: &str) -> String {
    format!(
        "{}/theme={}/type={}/",
        release_root(bucket, release),
        feature_type.theme(),
        feature_type
    )
}
