//! Bounding-box R-tree used for overlay candidate lookups.

use geo::{BoundingRect, MultiPolygon, Rect};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};

use crate::feature::FeatureSet;

type Entry = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// R-tree over the envelopes of a feature set, answering with feature
/// positions. Features with empty geometry are never candidates.
pub struct EnvelopeIndex {
    tree: RTree<Entry>,
}

impl EnvelopeIndex {
    pub fn build(set: &FeatureSet) -> Self {
        Self::from_geometries(set.geometries())
    }

    pub fn from_geometries<'a>(geoms: impl Iterator<Item = &'a MultiPolygon<f64>>) -> Self {
        let entries: Vec<Entry> = geoms
            .enumerate()
            .filter_map(|(i, geom)| {
                let rect = geom.bounding_rect()?;
                Some(GeomWithData::new(
                    Rectangle::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    i,
                ))
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Positions whose envelope touches `rect`, ascending.
    pub fn candidates(&self, rect: Rect<f64>) -> Vec<usize> {
        self.candidates_within(rect, 0.0)
    }

    /// Positions whose envelope lies within `distance` of `rect`, ascending.
    pub fn candidates_within(&self, rect: Rect<f64>, distance: f64) -> Vec<usize> {
        let envelope = AABB::from_corners(
            [rect.min().x - distance, rect.min().y - distance],
            [rect.max().x + distance, rect.max().y + distance],
        );
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.data)
            .collect();
        hits.sort_unstable();
        hits
    }

    pub fn candidates_for(&self, geom: &MultiPolygon<f64>) -> Vec<usize> {
        geom.bounding_rect()
            .map(|rect| self.candidates(rect))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::feature::Feature;
    use geo::{coord, polygon};

    fn square(x: f64, y: f64) -> Feature {
        Feature::from_polygon(polygon![
            (x: x, y: y), (x: x + 1.0, y: y), (x: x + 1.0, y: y + 1.0), (x: x, y: y + 1.0), (x: x, y: y)
        ])
    }

    #[test]
    fn candidates_come_back_in_feature_order() {
        let set = FeatureSet::new(Crs::BRITISH_NATIONAL_GRID).with_features(vec![
            square(5.0, 5.0),
            square(0.0, 0.0),
            Feature::new(MultiPolygon::new(vec![]), Default::default()),
            square(0.5, 0.5),
        ]);
        let index = EnvelopeIndex::build(&set);
        assert_eq!(index.len(), 3);
        let rect = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 });
        assert_eq!(index.candidates(rect), vec![1, 3]);
        assert_eq!(index.candidates_within(rect, 4.5), vec![0, 1, 3]);
    }
}
