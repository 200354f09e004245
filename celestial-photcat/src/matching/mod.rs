//! Positional cross-matching between two catalogs.
//!
//! Two modes are available, selected by the tolerance:
//!
//! - **Radius** (`Some(r)`): a row of `self` is matched only when exactly one
//!   row of `other` lies within `r` of it. Rows with several candidates are
//!   dropped, not resolved.
//! - **Nearest** (`None`): every row of `other` picks its nearest row in
//!   `self`; each row of `self` then keeps the closest of the rows that picked
//!   it, the lowest `other` index winning exact ties.
//!
//! The key columns are any two numeric columns; distances are Euclidean in
//! those units. Pairs where a requested extraction column is NaN on either
//! side are discarded.

pub mod kdtree;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::table::{Column, ColumnData};
use kdtree::KdTree;
use tracing::info;

/// Matched index pairs with the requested columns gathered at those rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    /// `(index_in_self, index_in_other)`, ascending in the first index.
    pub pairs: Vec<(usize, usize)>,
    pub this: Vec<Column>,
    pub other: Vec<Column>,
}

impl MatchResult {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn this_column(&self, name: &str) -> Option<&Column> {
        self.this.iter().find(|c| c.name == name)
    }

    pub fn other_column(&self, name: &str) -> Option<&Column> {
        self.other.iter().find(|c| c.name == name)
    }
}

impl Catalog {
    /// Match on sky position (`ra_deg`, `dec_deg`) and extract the positions
    /// of both sides.
    pub fn match_positions(&self, other: &Catalog, tolerance: Option<f64>) -> Result<MatchResult> {
        let keys = ["ra_deg", "dec_deg"];
        self.match_with(other, keys, keys, &keys, &keys, tolerance)
    }

    pub fn match_with(
        &self,
        other: &Catalog,
        keys_self: [&str; 2],
        keys_other: [&str; 2],
        extract_self: &[&str],
        extract_other: &[&str],
        tolerance: Option<f64>,
    ) -> Result<MatchResult> {
        if self.is_empty() || other.is_empty() {
            return Ok(MatchResult {
                pairs: Vec::new(),
                this: empty_extraction(self, extract_self),
                other: empty_extraction(other, extract_other),
            });
        }

        let this_columns = resolve(self, extract_self)?;
        let other_columns = resolve(other, extract_other)?;

        let this_points = key_points(self, keys_self)?;
        let other_points = key_points(other, keys_other)?;

        let candidates = match tolerance {
            Some(radius) => {
                if !(radius >= 0.0) {
                    return Err(Error::Schema(format!("invalid match tolerance {}", radius)));
                }
                exclusive_pairs(&this_points, &KdTree::build(other_points), radius)
            }
            None => nearest_pairs(&KdTree::build(this_points), &other_points, self.len()),
        };

        let pairs: Vec<(usize, usize)> = candidates
            .into_iter()
            .filter(|&(i, j)| {
                this_columns.iter().all(|c| !c.data.is_nan_at(i))
                    && other_columns.iter().all(|c| !c.data.is_nan_at(j))
            })
            .collect();

        let this_rows: Vec<usize> = pairs.iter().map(|&(i, _)| i).collect();
        let other_rows: Vec<usize> = pairs.iter().map(|&(_, j)| j).collect();

        info!(
            this = %self.name,
            other = %other.name,
            mode = if tolerance.is_some() { "radius" } else { "nearest" },
            pairs = pairs.len(),
            "matched catalogs"
        );

        Ok(MatchResult {
            this: gather(&this_columns, &this_rows),
            other: gather(&other_columns, &other_rows),
            pairs,
        })
    }
}

fn resolve<'a>(catalog: &'a Catalog, names: &[&str]) -> Result<Vec<&'a Column>> {
    names.iter().map(|name| catalog.require_column(name)).collect()
}

fn gather(columns: &[&Column], rows: &[usize]) -> Vec<Column> {
    columns
        .iter()
        .map(|column| Column {
            name: column.name.clone(),
            data: column.data.select(rows),
            unit: column.unit,
        })
        .collect()
}

fn empty_extraction(catalog: &Catalog, names: &[&str]) -> Vec<Column> {
    names
        .iter()
        .map(|name| match catalog.column(name) {
            Some(column) => Column {
                name: column.name.clone(),
                data: column.data.select(&[]),
                unit: column.unit,
            },
            None => Column::new(*name, ColumnData::Float(Vec::new())),
        })
        .collect()
}

fn key_points(catalog: &Catalog, keys: [&str; 2]) -> Result<Vec<[f64; 2]>> {
    let x = catalog.float_values(keys[0])?;
    let y = catalog.float_values(keys[1])?;
    Ok(x.into_iter().zip(y).map(|(x, y)| [x, y]).collect())
}

/// Rows of `this` with exactly one neighbour in `other` within `radius`.
fn exclusive_pairs(this: &[[f64; 2]], other: &KdTree<2>, radius: f64) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for (i, point) in this.iter().enumerate() {
        // Non-finite queries come back empty.
        if let [j] = other.within_radius(point, radius)[..] {
            pairs.push((i, j));
        }
    }
    pairs
}

/// For each row of `this`, the closest `other` row among those whose nearest
/// neighbour it is.
fn nearest_pairs(this: &KdTree<2>, other: &[[f64; 2]], this_len: usize) -> Vec<(usize, usize)> {
    let mut best: Vec<Option<(usize, f64)>> = vec![None; this_len];

    for (j, point) in other.iter().enumerate() {
        if let Some((i, distance)) = this.nearest(point) {
            match best[i] {
                Some((_, current)) if current <= distance => {}
                _ => best[i] = Some((j, distance)),
            }
        }
    }

    best.into_iter()
        .enumerate()
        .filter_map(|(i, choice)| choice.map(|(j, _)| (i, j)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnType;

    fn catalog(name: &str, points: &[(f64, f64)]) -> Catalog {
        let mut catalog = Catalog::new(name);
        catalog
            .add_fields(
                &["ra_deg", "dec_deg"],
                vec![
                    ColumnData::Float(points.iter().map(|p| p.0).collect()),
                    ColumnData::Float(points.iter().map(|p| p.1).collect()),
                ],
                &[ColumnType::Float, ColumnType::Float],
            )
            .unwrap();
        catalog
    }

    #[test]
    fn radius_single_candidate_matches() {
        let a = catalog("a", &[(10.0, 10.0)]);
        let b = catalog("b", &[(10.0, 10.0001)]);
        let result = a.match_positions(&b, Some(0.001)).unwrap();
        assert_eq!(result.pairs, vec![(0, 0)]);
        assert_eq!(
            result.other_column("dec_deg").unwrap().data,
            ColumnData::Float(vec![10.0001])
        );
    }

    #[test]
    fn radius_ambiguous_candidate_is_dropped() {
        let a = catalog("a", &[(10.0, 10.0), (20.0, 20.0)]);
        let b = catalog("b", &[(10.0, 10.0001), (10.0, 9.9999), (20.0, 20.0)]);
        let result = a.match_positions(&b, Some(0.001)).unwrap();
        assert_eq!(result.pairs, vec![(1, 2)]);
    }

    #[test]
    fn nearest_prefers_closer_point() {
        let a = catalog("a", &[(0.0, 0.0)]);
        let b = catalog("b", &[(0.0, 0.1), (0.0, 0.2)]);
        let result = a.match_positions(&b, None).unwrap();
        assert_eq!(result.pairs, vec![(0, 0)]);

        let b = catalog("b", &[(0.0, 0.2), (0.0, 0.1)]);
        let result = a.match_positions(&b, None).unwrap();
        assert_eq!(result.pairs, vec![(0, 1)]);
    }

    #[test]
    fn nearest_ties_take_first_other_row() {
        let a = catalog("a", &[(0.0, 0.0)]);
        let b = catalog("b", &[(0.0, 0.1), (0.1, 0.0), (0.0, -0.1)]);
        let result = a.match_positions(&b, None).unwrap();
        assert_eq!(result.pairs, vec![(0, 0)]);
    }

    #[test]
    fn nearest_output_is_in_self_order() {
        let a = catalog("a", &[(0.0, 0.0), (5.0, 5.0), (9.0, 9.0)]);
        let b = catalog("b", &[(9.1, 9.0), (0.1, 0.0)]);
        let result = a.match_positions(&b, None).unwrap();
        assert_eq!(result.pairs, vec![(0, 1), (2, 0)]);
    }

    #[test]
    fn nan_extraction_drops_pair() {
        let a = catalog("a", &[(0.0, 0.0), (1.0, 1.0)]);
        let mut b = catalog("b", &[(0.0, 0.0), (1.0, 1.0)]);
        b.add_field("mag", ColumnData::Float(vec![f64::NAN, 12.0]), ColumnType::Float)
            .unwrap();
        let keys = ["ra_deg", "dec_deg"];
        let result = a
            .match_with(&b, keys, keys, &["ra_deg"], &["mag"], Some(0.01))
            .unwrap();
        assert_eq!(result.pairs, vec![(1, 1)]);
        assert_eq!(result.other[0].data, ColumnData::Float(vec![12.0]));
    }

    #[test]
    fn empty_side_gives_empty_result() {
        let a = catalog("a", &[(0.0, 0.0)]);
        let b = Catalog::new("empty");
        let result = a.match_positions(&b, Some(1.0)).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.this.len(), 2);
        assert!(result.this[0].is_empty());
    }

    #[test]
    fn non_finite_keys_never_match() {
        let a = catalog("a", &[(f64::NAN, 0.0), (1.0, 1.0)]);
        let b = catalog("b", &[(1.0, 1.0), (f64::NAN, 0.0)]);
        assert_eq!(a.match_positions(&b, Some(0.1)).unwrap().pairs, vec![(1, 0)]);
        assert_eq!(a.match_positions(&b, None).unwrap().pairs, vec![(1, 0)]);
    }

    #[test]
    fn missing_key_is_an_error() {
        let a = catalog("a", &[(0.0, 0.0)]);
        let b = catalog("b", &[(0.0, 0.0)]);
        let result = a.match_with(&b, ["x", "y"], ["ra_deg", "dec_deg"], &[], &[], None);
        assert!(matches!(result, Err(Error::MissingColumn { .. })));
    }
}
