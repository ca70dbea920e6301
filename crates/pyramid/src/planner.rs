use glam::{DAffine3, DMat3, DVec2, DVec3};
use source::{Pixel, TileSource, voxel_size};

/// Values closer than this to an integer are treated as that integer.
const SNAP_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("metadata tile has no resolution levels")]
    NoLevels,
    #[error("{transforms} level transforms but {dimensions} level dimensions")]
    DimensionMismatch { transforms: usize, dimensions: usize },
    #[error("level {level} has a degenerate voxel size along axis {dim}")]
    DegenerateTransform { level: usize, dim: usize },
    #[error("relative margin must be finite and non-negative, got {0}")]
    InvalidMargin(f64),
    #[error("level {level} has no voxels along axis {dim}")]
    EmptyTile { level: usize, dim: usize },
    #[error(
        "level {level} axis {dim} is misaligned by {misalignment} voxels; the downsampling factors do not divide the tile size"
    )]
    Misaligned {
        level: usize,
        dim: usize,
        misalignment: f64,
    },
}

/// Metadata of the representative tile, one entry per level.
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidInput {
    pub level_transforms: Vec<DAffine3>,
    pub level_dimensions: Vec<[u64; 3]>,
}

impl PyramidInput {
    /// Reads level transforms and dimensions without opening pixel data.
    pub fn from_tile<T: Pixel>(tile: &TileSource<T>) -> Self {
        let levels = tile.num_levels();
        Self {
            level_transforms: (0..levels).map(|l| tile.level_transform(l)).collect(),
            level_dimensions: (0..levels).map(|l| tile.level_dimensions(l)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LevelGeometry {
    pub voxel_size: DVec3,
    /// Ratio of this level's voxel size to the previous level's.
    pub downsampling_factor: DVec3,
    /// Voxel size relative to level 0.
    pub mipmap_scale: DVec3,
    /// Padded tile cell size in voxels.
    pub tile_dims: [u64; 3],
    /// Native size of the representative tile at this level.
    pub original_dims: [u64; 3],
    /// Offset that centers the native tile inside its padded cell.
    pub margin_translation: DVec3,
    /// Stitched voxel space to world space, before any user transform.
    pub source_transform: DAffine3,
}

impl LevelGeometry {
    /// Whole-voxel part of the margin translation applied to tile data.
    pub fn integer_margin(&self) -> [i64; 3] {
        [
            self.margin_translation.x.trunc() as i64,
            self.margin_translation.y.trunc() as i64,
            self.margin_translation.z.trunc() as i64,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PyramidPlan {
    levels: Vec<LevelGeometry>,
    relative_margin: f64,
}

impl PyramidPlan {
    pub fn plan(input: &PyramidInput, relative_margin: f64) -> Result<Self, GeometryError> {
        let num_levels = input.level_transforms.len();
        if num_levels == 0 {
            return Err(GeometryError::NoLevels);
        }
        if input.level_dimensions.len() != num_levels {
            return Err(GeometryError::DimensionMismatch {
                transforms: num_levels,
                dimensions: input.level_dimensions.len(),
            });
        }
        if !relative_margin.is_finite() || relative_margin < 0.0 {
            return Err(GeometryError::InvalidMargin(relative_margin));
        }

        let voxel_sizes = input
            .level_transforms
            .iter()
            .enumerate()
            .map(|(level, transform)| {
                let size = voxel_size(transform);
                match (0..3).find(|&d| !(size[d].is_finite() && size[d] > 0.0)) {
                    Some(dim) => Err(GeometryError::DegenerateTransform { level, dim }),
                    None => Ok(size),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let factors: Vec<DVec3> = (0..num_levels)
            .map(|level| {
                if level == 0 {
                    DVec3::ONE
                } else {
                    voxel_sizes[level] / voxel_sizes[level - 1]
                }
            })
            .collect();
        let factor_product = factors.iter().fold(DVec3::ONE, |acc, f| acc * *f);

        let tile_dims = Self::plan_tile_dims(input, &factors, factor_product, relative_margin)?;

        let level_zero_linear = DAffine3::from_mat3(input.level_transforms[0].matrix3);
        let levels = (0..num_levels)
            .map(|level| {
                let original_dims = input.level_dimensions[level];
                let margin_translation = DVec3::from_array(std::array::from_fn(|d| {
                    (tile_dims[level][d] as f64 - original_dims[d] as f64) / 2.0
                }));
                let mipmap_scale = voxel_sizes[level] / voxel_sizes[0];
                let shift = 0.5 * (mipmap_scale - DVec3::ONE) + margin_translation.fract();
                let mipmap = DAffine3::from_mat3_translation(
                    DMat3::from_diagonal(mipmap_scale),
                    shift,
                );
                LevelGeometry {
                    voxel_size: voxel_sizes[level],
                    downsampling_factor: factors[level],
                    mipmap_scale,
                    tile_dims: tile_dims[level],
                    original_dims,
                    margin_translation,
                    source_transform: level_zero_linear * mipmap,
                }
            })
            .collect();

        Ok(Self {
            levels,
            relative_margin,
        })
    }

    fn plan_tile_dims(
        input: &PyramidInput,
        factors: &[DVec3],
        factor_product: DVec3,
        relative_margin: f64,
    ) -> Result<Vec<[u64; 3]>, GeometryError> {
        let mut level_zero = [0u64; 3];
        for d in 0..3 {
            let original = input.level_dimensions[0][d] as f64;
            // stitching pads x and y only
            let padded = if d < 2 {
                snap(original * (1.0 + 2.0 * relative_margin))
            } else {
                original
            };
            let product = factor_product[d];
            let cells = snap(padded / product).ceil();
            level_zero[d] = snap(cells * product).trunc() as u64;
            if level_zero[d] == 0 {
                return Err(GeometryError::EmptyTile { level: 0, dim: d });
            }
        }

        let mut dims = vec![level_zero];
        let mut cumulative = DVec3::ONE;
        for (level, factor) in factors.iter().enumerate().skip(1) {
            cumulative *= *factor;
            let previous = dims[level - 1];
            let mut current = [0u64; 3];
            for d in 0..3 {
                let exact = previous[d] as f64 / factor[d];
                let rounded = exact.round();
                if rounded < 1.0 {
                    return Err(GeometryError::EmptyTile { level, dim: d });
                }
                let misalignment = (rounded - level_zero[d] as f64 / cumulative[d]).abs();
                if misalignment >= 1.0 {
                    return Err(GeometryError::Misaligned {
                        level,
                        dim: d,
                        misalignment,
                    });
                }
                if misalignment > SNAP_EPSILON {
                    log::warn!(
                        "level {level} axis {d}: tile size {exact} rounded to {rounded}, {misalignment} voxel misalignment"
                    );
                }
                current[d] = rounded as u64;
            }
            dims.push(current);
        }
        Ok(dims)
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> &[LevelGeometry] {
        &self.levels
    }

    pub fn level(&self, level: usize) -> &LevelGeometry {
        &self.levels[level]
    }

    pub fn relative_margin(&self) -> f64 {
        self.relative_margin
    }

    pub fn tile_dims(&self) -> Vec<[u64; 3]> {
        self.levels.iter().map(|level| level.tile_dims).collect()
    }

    /// World-space size of one grid cell in x and y.
    pub fn tile_real_dimensions(&self) -> DVec2 {
        let level_zero = &self.levels[0];
        DVec2::new(
            level_zero.tile_dims[0] as f64 * level_zero.voxel_size.x,
            level_zero.tile_dims[1] as f64 * level_zero.voxel_size.y,
        )
    }
}

fn snap(value: f64) -> f64 {
    let nearest = value.round();
    if (value - nearest).abs() < SNAP_EPSILON {
        nearest
    } else {
        value
    }
}
