//! Islands: connected groups of above-threshold pixels and their summary
//! parameters.

use glam::DVec2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use super::config::Connectivity;
use super::labeling::LabelMap;
use super::threshold::{ThresholdMasks, Thresholds};
use crate::common::Buffer2;
use crate::math::BoundingBox;

/// Polarity of an island relative to the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum Sign {
    Positive,
    Negative,
}

impl Sign {
    /// `+1.0` or `-1.0`.
    #[inline]
    pub const fn value(self) -> f64 {
        match self {
            Sign::Positive => 1.0,
            Sign::Negative => -1.0,
        }
    }
}

/// Summary of one island.
///
/// Coordinates are pixel indices; `barycentre.x` is the column and
/// `barycentre.y` the row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IslandParams {
    /// Island id in the label map (>= 1).
    pub label: u32,
    pub sign: Sign,
    /// Tight box around the member pixels.
    pub bounding_box: BoundingBox,
    pub pixel_count: usize,
    /// Most extreme member value (maximum for positive, minimum for negative islands).
    pub extremum_value: f64,
    pub extremum_row: usize,
    pub extremum_col: usize,
    /// Centroid of member pixels weighted by `|value - background|`.
    pub barycentre: DVec2,
}

/// Islands of an image together with their label map.
#[derive(Debug, Clone)]
pub struct Islands {
    /// Islands in label order.
    pub islands: Vec<IslandParams>,
    /// Final label of every pixel, 0 for background.
    pub labels: Buffer2<u32>,
}

/// Running totals for one labelled component.
#[derive(Debug, Clone, Copy)]
struct Component {
    first_index: usize,
    bounding_box: BoundingBox,
    pixel_count: usize,
    extremum_deviation: f64,
    extremum_value: f64,
    extremum_row: usize,
    extremum_col: usize,
    weighted_sum: DVec2,
    weight_total: f64,
    seeded: bool,
}

impl Component {
    fn new(index: usize, row: usize, col: usize) -> Self {
        Self {
            first_index: index,
            bounding_box: BoundingBox::from_pixel(row, col),
            pixel_count: 0,
            extremum_deviation: f64::NEG_INFINITY,
            extremum_value: f64::NAN,
            extremum_row: row,
            extremum_col: col,
            weighted_sum: DVec2::ZERO,
            weight_total: 0.0,
            seeded: false,
        }
    }

    #[inline]
    fn add(&mut self, row: usize, col: usize, value: f64, deviation: f64, seed: bool) {
        self.bounding_box.include(row, col);
        self.pixel_count += 1;
        if deviation > self.extremum_deviation {
            self.extremum_deviation = deviation;
            self.extremum_value = value;
            self.extremum_row = row;
            self.extremum_col = col;
        }
        let weight = deviation.abs();
        self.weighted_sum += weight * DVec2::new(col as f64, row as f64);
        self.weight_total += weight;
        self.seeded |= seed;
    }

    fn into_params(self, label: u32, sign: Sign) -> IslandParams {
        let barycentre = if self.weight_total > 0.0 {
            self.weighted_sum / self.weight_total
        } else {
            DVec2::new(self.extremum_col as f64, self.extremum_row as f64)
        };
        IslandParams {
            label,
            sign,
            bounding_box: self.bounding_box,
            pixel_count: self.pixel_count,
            extremum_value: self.extremum_value,
            extremum_row: self.extremum_row,
            extremum_col: self.extremum_col,
            barycentre,
        }
    }
}

/// Label one sign's analysis mask and summarise every component that holds
/// at least one detection pixel.
fn seeded_components(
    image: &Buffer2<f32>,
    masks: &ThresholdMasks,
    thresholds: &Thresholds,
    sign: Sign,
    connectivity: Connectivity,
) -> (LabelMap, Vec<Option<Component>>) {
    let label_map = LabelMap::from_mask(&masks.analysis, connectivity);
    let mut components: Vec<Option<Component>> = vec![None; label_map.num_labels()];
    let width = image.width();
    let s = sign.value();

    for (index, &label) in label_map.labels().pixels().iter().enumerate() {
        if label == 0 {
            continue;
        }
        let row = index / width;
        let col = index % width;
        let value = image[index] as f64;
        let deviation = s * (value - thresholds.background);
        let seed = masks.detection.get_xy(col, row);
        components[label as usize - 1]
            .get_or_insert_with(|| Component::new(index, row, col))
            .add(row, col, value, deviation, seed);
    }

    for component in components.iter_mut() {
        if matches!(component, Some(c) if !c.seeded) {
            *component = None;
        }
    }

    (label_map, components)
}

/// Find the islands of an image.
///
/// Positive and negative analysis masks are labelled separately so islands of
/// opposite sign never merge. Components without a detection pixel are
/// dropped. Surviving islands of both signs are numbered 1..n in raster order
/// of their first pixel.
pub fn extract_islands(
    image: &Buffer2<f32>,
    positive: &ThresholdMasks,
    negative: Option<&ThresholdMasks>,
    thresholds: &Thresholds,
    connectivity: Connectivity,
) -> Islands {
    let (pos_map, pos_components) =
        seeded_components(image, positive, thresholds, Sign::Positive, connectivity);
    let negative = negative.map(|masks| {
        seeded_components(image, masks, thresholds, Sign::Negative, connectivity)
    });

    let mut ordered: Vec<(Sign, usize, Component)> = Vec::new();
    let mut push_seeded = |sign: Sign, components: &[Option<Component>]| {
        for (idx, component) in components.iter().enumerate() {
            if let Some(c) = component {
                ordered.push((sign, idx, *c));
            }
        }
    };
    push_seeded(Sign::Positive, &pos_components);
    if let Some((_, neg_components)) = &negative {
        push_seeded(Sign::Negative, neg_components);
    }
    ordered.sort_unstable_by_key(|&(_, _, c)| c.first_index);

    let mut pos_remap = vec![0u32; pos_components.len() + 1];
    let mut neg_remap = vec![0u32; negative.as_ref().map_or(0, |(_, c)| c.len()) + 1];
    let mut islands = Vec::with_capacity(ordered.len());
    for (i, &(sign, idx, component)) in ordered.iter().enumerate() {
        let label = i as u32 + 1;
        match sign {
            Sign::Positive => pos_remap[idx + 1] = label,
            Sign::Negative => neg_remap[idx + 1] = label,
        }
        islands.push(component.into_params(label, sign));
    }

    let width = image.width();
    let mut labels = Buffer2::new_default(width, image.height());
    if !islands.is_empty() {
        let neg_labels = negative.as_ref().map(|(map, _)| map.labels().pixels());
        labels
            .pixels_mut()
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                let start = y * width;
                let pos_row = &pos_map.labels().pixels()[start..start + width];
                for (x, out) in row.iter_mut().enumerate() {
                    let p = pos_row[x];
                    *out = if p != 0 {
                        pos_remap[p as usize]
                    } else if let Some(neg) = neg_labels {
                        neg_remap[neg[start + x] as usize]
                    } else {
                        0
                    };
                }
            });
    }

    Islands { islands, labels }
}

/// Drop islands smaller than `min_area` pixels.
///
/// Surviving islands keep their ids, so ids may have gaps afterwards. Pixels
/// of dropped islands are cleared in the label map. Returns the number of
/// islands removed.
pub fn filter_by_area(islands: &mut Islands, min_area: usize) -> usize {
    let before = islands.islands.len();
    let max_label = islands.islands.iter().map(|i| i.label).max().unwrap_or(0);
    let mut dropped = vec![false; max_label as usize + 1];

    islands.islands.retain(|island| {
        let keep = island.pixel_count >= min_area;
        if !keep {
            dropped[island.label as usize] = true;
        }
        keep
    });

    let removed = before - islands.islands.len();
    if removed > 0 {
        islands.labels.pixels_mut().par_iter_mut().for_each(|label| {
            if dropped.get(*label as usize).copied().unwrap_or(false) {
                *label = 0;
            }
        });
    }
    removed
}
