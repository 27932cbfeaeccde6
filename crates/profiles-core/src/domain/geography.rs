use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use profiles_warehouse::GeographyRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CoreError, ValidationError};

/// Kind of administrative or statistical area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GeogKind {
    BlockGroup,
    Tract,
    CountySubdivision,
    Place,
    Puma,
    SchoolDistrict,
    StateHouse,
    StateSenate,
    County,
    Zcta,
    Neighborhood,
}

/// Sub-kinds tried, in order, when a geography must be served by roll-up.
pub const SUBGEOG_TYPE_ORDER: [GeogKind; 7] = [
    GeogKind::BlockGroup,
    GeogKind::Tract,
    GeogKind::CountySubdivision,
    GeogKind::Place,
    GeogKind::SchoolDistrict,
    GeogKind::Zcta,
    GeogKind::County,
];

impl GeogKind {
    pub const ALL: [Self; 11] = [
        Self::BlockGroup,
        Self::Tract,
        Self::CountySubdivision,
        Self::Place,
        Self::Puma,
        Self::SchoolDistrict,
        Self::StateHouse,
        Self::StateSenate,
        Self::County,
        Self::Zcta,
        Self::Neighborhood,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BlockGroup => "blockGroup",
            Self::Tract => "tract",
            Self::CountySubdivision => "countySubdivision",
            Self::Place => "place",
            Self::Puma => "puma",
            Self::SchoolDistrict => "schoolDistrict",
            Self::StateHouse => "stateHouse",
            Self::StateSenate => "stateSenate",
            Self::County => "county",
            Self::Zcta => "zcta",
            Self::Neighborhood => "neighborhood",
        }
    }

    pub const fn title(self) -> &'static str {
        match self {
            Self::BlockGroup => "Block Group",
            Self::Tract => "Tract",
            Self::CountySubdivision => "County Subdivision",
            Self::Place => "Place",
            Self::Puma => "PUMA",
            Self::SchoolDistrict => "School District",
            Self::StateHouse => "State House District",
            Self::StateSenate => "State Senate District",
            Self::County => "County",
            Self::Zcta => "Zip Code",
            Self::Neighborhood => "Neighborhood",
        }
    }

    pub const fn plural_title(self) -> &'static str {
        match self {
            Self::BlockGroup => "Block Groups",
            Self::Tract => "Tracts",
            Self::CountySubdivision => "County Subdivisions",
            Self::Place => "Places",
            Self::Puma => "PUMAs",
            Self::SchoolDistrict => "School Districts",
            Self::StateHouse => "State House Districts",
            Self::StateSenate => "State Senate Districts",
            Self::County => "Counties",
            Self::Zcta => "Zip Codes",
            Self::Neighborhood => "Neighborhoods",
        }
    }
}

impl Display for GeogKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeogKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().to_ascii_lowercase() == normalized)
            .ok_or_else(|| ValidationError::InvalidGeogKind {
                value: value.to_owned(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geography {
    pub global_geoid: String,
    pub kind: GeogKind,
    pub common_geoid: String,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub in_extent: bool,
    /// Child common geoids by kind. The only source of truth for roll-up.
    #[serde(default)]
    pub subregions: BTreeMap<GeogKind, Vec<String>>,
    #[serde(default)]
    pub geometry: Option<Value>,
    #[serde(default)]
    pub centroid: Option<(f64, f64)>,
    #[serde(default)]
    pub base_zoom: Option<i32>,
}

impl Geography {
    pub fn new(kind: GeogKind, common_geoid: impl Into<String>, name: impl Into<String>) -> Self {
        let common_geoid = common_geoid.into();
        Self {
            global_geoid: format!("{}:{common_geoid}", kind.as_str()),
            slug: format!("{}-{}", kind.as_str().to_ascii_lowercase(), common_geoid),
            kind,
            common_geoid,
            name: name.into(),
            in_extent: false,
            subregions: BTreeMap::new(),
            geometry: None,
            centroid: None,
            base_zoom: None,
        }
    }

    pub fn with_subregions(mut self, kind: GeogKind, children: Vec<String>) -> Self {
        self.subregions.insert(kind, children);
        self
    }

    pub fn title(&self) -> String {
        match self.kind {
            GeogKind::BlockGroup | GeogKind::Tract => {
                format!("{} {}", self.kind.title(), self.name)
            }
            GeogKind::County if !self.name.ends_with("County") => format!("{} County", self.name),
            _ => self.name.clone(),
        }
    }

    pub fn subregion_ids(&self, kind: GeogKind) -> &[String] {
        self.subregions
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// GeoJSON feature used to highlight this geography on a map.
    pub fn feature(&self) -> Option<Value> {
        let geometry = self.geometry.clone()?;
        Some(serde_json::json!({
            "type": "Feature",
            "geometry": geometry,
            "properties": {
                "geoid": self.common_geoid,
                "name": self.name,
                "title": self.title(),
            }
        }))
    }

    fn from_record(record: GeographyRecord) -> Result<Self, CoreError> {
        let kind = GeogKind::from_str(&record.kind)?;
        let subregions = if record.subregions.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&record.subregions)?
        };
        let geometry = record
            .geometry
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Self {
            global_geoid: record.global_geoid,
            kind,
            common_geoid: record.common_geoid,
            slug: record.slug,
            name: record.name,
            in_extent: record.in_extent,
            subregions,
            geometry,
            centroid: record.centroid_x.zip(record.centroid_y),
            base_zoom: record.base_zoom,
        })
    }

    fn to_record(&self) -> Result<GeographyRecord, CoreError> {
        Ok(GeographyRecord {
            global_geoid: self.global_geoid.clone(),
            kind: self.kind.as_str().to_owned(),
            common_geoid: self.common_geoid.clone(),
            slug: self.slug.clone(),
            name: self.name.clone(),
            title: self.title(),
            in_extent: self.in_extent,
            subregions: serde_json::to_string(&self.subregions)?,
            geometry: self
                .geometry
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            centroid_x: self.centroid.map(|(x, _)| x),
            centroid_y: self.centroid.map(|(_, y)| y),
            base_zoom: self.base_zoom,
        })
    }
}

/// Slug-keyed store of every known geography.
#[derive(Debug, Clone, Default)]
pub struct GeographyCatalog {
    geographies: Vec<Geography>,
    by_geoid: HashMap<(GeogKind, String), usize>,
    by_slug: HashMap<String, usize>,
}

impl GeographyCatalog {
    pub fn new(geographies: Vec<Geography>) -> Self {
        let mut catalog = Self::default();
        for geography in geographies {
            catalog.insert(geography);
        }
        catalog
    }

    pub fn from_records(records: Vec<GeographyRecord>) -> Result<Self, CoreError> {
        let geographies = records
            .into_iter()
            .map(Geography::from_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(geographies))
    }

    pub fn to_records(&self) -> Result<Vec<GeographyRecord>, CoreError> {
        self.geographies.iter().map(Geography::to_record).collect()
    }

    /// Insert or replace by `(kind, common_geoid)`.
    pub fn insert(&mut self, geography: Geography) {
        let key = (geography.kind, geography.common_geoid.clone());
        if let Some(&index) = self.by_geoid.get(&key) {
            self.by_slug.remove(&self.geographies[index].slug);
            self.by_slug.insert(geography.slug.clone(), index);
            self.geographies[index] = geography;
            return;
        }
        let index = self.geographies.len();
        self.by_geoid.insert(key, index);
        self.by_slug.insert(geography.slug.clone(), index);
        self.geographies.push(geography);
    }

    pub fn len(&self) -> usize {
        self.geographies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geographies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Geography> {
        self.geographies.iter()
    }

    /// Look up by common geoid, falling back to slug.
    pub fn find(&self, kind: GeogKind, id: &str) -> Option<&Geography> {
        self.by_geoid
            .get(&(kind, id.to_owned()))
            .or_else(|| self.by_slug.get(id))
            .map(|&index| &self.geographies[index])
            .filter(|geography| geography.kind == kind)
    }

    pub fn get(&self, kind: GeogKind, id: &str) -> Result<&Geography, ValidationError> {
        self.find(kind, id)
            .ok_or_else(|| ValidationError::UnknownGeography {
                kind: kind.as_str().to_owned(),
                id: id.to_owned(),
            })
    }

    /// Every in-extent geography of `kind`, ordered by common geoid.
    pub fn all_in_extent(&self, kind: GeogKind) -> Vec<&Geography> {
        let mut found: Vec<&Geography> = self
            .geographies
            .iter()
            .filter(|geography| geography.kind == kind && geography.in_extent)
            .collect();
        found.sort_by(|a, b| a.common_geoid.cmp(&b.common_geoid));
        found
    }

    /// Children of `geography` of `kind`, in subregion-map order.
    pub fn subregions(
        &self,
        geography: &Geography,
        kind: GeogKind,
    ) -> Result<Vec<&Geography>, ValidationError> {
        geography
            .subregion_ids(kind)
            .iter()
            .map(|child| {
                self.find(kind, child)
                    .ok_or_else(|| ValidationError::BrokenSubregion {
                        geog: geography.slug.clone(),
                        kind: kind.as_str().to_owned(),
                        child: child.clone(),
                    })
            })
            .collect()
    }

    /// Every subregion reference must resolve.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for geography in &self.geographies {
            for kind in geography.subregions.keys() {
                self.subregions(geography, *kind)?;
            }
        }
        Ok(())
    }

    /// Mark the listed counties and everything in their subregion maps as in
    /// extent; everything else falls outside. Returns the in-extent global geoids.
    pub fn apply_extent(&mut self, county_geoids: &[String]) -> Vec<String> {
        let mut inside: HashSet<usize> = HashSet::new();
        for county in county_geoids {
            let Some(&index) = self.by_geoid.get(&(GeogKind::County, county.clone())) else {
                tracing::warn!(county = %county, "extent county is not in the catalog");
                continue;
            };
            inside.insert(index);
            for (kind, children) in &self.geographies[index].subregions {
                for child in children {
                    if let Some(&child_index) = self.by_geoid.get(&(*kind, child.clone())) {
                        inside.insert(child_index);
                    }
                }
            }
        }

        let mut global_geoids = Vec::with_capacity(inside.len());
        for (index, geography) in self.geographies.iter_mut().enumerate() {
            geography.in_extent = inside.contains(&index);
            if geography.in_extent {
                global_geoids.push(geography.global_geoid.clone());
            }
        }
        global_geoids.sort();
        global_geoids
    }

    /// Replace the `child_kind` subregions of one geography.
    pub fn assign_subregions(
        &mut self,
        kind: GeogKind,
        id: &str,
        child_kind: GeogKind,
        children: Vec<String>,
    ) -> Result<&Geography, ValidationError> {
        let index = self
            .find(kind, id)
            .and_then(|geography| self.by_slug.get(&geography.slug).copied())
            .ok_or_else(|| ValidationError::UnknownGeography {
                kind: kind.as_str().to_owned(),
                id: id.to_owned(),
            })?;
        self.geographies[index]
            .subregions
            .insert(child_kind, children);
        Ok(&self.geographies[index])
    }
}

/// Parse `hood,child1|child2` lines. Blank lines, `#` comments, and a
/// leading header row are skipped.
pub fn parse_subregion_lines(text: &str) -> Vec<(String, Vec<String>)> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(','))
        .filter(|(parent, _)| !parent.trim().eq_ignore_ascii_case("hood"))
        .map(|(parent, children)| {
            let children = children
                .split('|')
                .map(|child| child.trim().trim_matches('"').to_owned())
                .filter(|child| !child.is_empty())
                .collect();
            (parent.trim().trim_matches('"').to_owned(), children)
        })
        .collect()
}
