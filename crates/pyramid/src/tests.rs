use glam::{DAffine3, DVec3};
use model::{GridLayout, GridPos};

use super::*;

fn mipmap_input(width: u64, height: u64, levels: usize) -> PyramidInput {
    let mut level_transforms = Vec::new();
    let mut level_dimensions = Vec::new();
    for level in 0..levels {
        let factor = (1u64 << level) as f64;
        level_transforms.push(
            DAffine3::from_translation(DVec3::new(0.5 * (factor - 1.0), 0.5 * (factor - 1.0), 0.0))
                * DAffine3::from_scale(DVec3::new(factor, factor, 1.0)),
        );
        level_dimensions.push([
            width.div_ceil(1 << level),
            height.div_ceil(1 << level),
            1,
        ]);
    }
    PyramidInput {
        level_transforms,
        level_dimensions,
    }
}

#[test]
fn single_tile_without_margin_keeps_native_size() {
    let plan = PyramidPlan::plan(&mipmap_input(100, 100, 1), 0.0).expect("plan");
    let layout = GridLayout::from_positions(&[GridPos::new(0, 0)]).expect("layout");
    let mapper = CoordinateMapper::new(&plan, layout.min());

    assert_eq!(plan.level(0).tile_dims, [100, 100, 1]);
    assert_eq!(plan.level(0).margin_translation, DVec3::ZERO);
    assert_eq!(mapper.global_interval(&layout, 0).dimensions(), [100, 100, 1]);
}

#[test]
fn two_by_two_grid_with_ten_percent_margin() {
    let plan = PyramidPlan::plan(&mipmap_input(100, 100, 1), 0.1).expect("plan");
    let layout = GridLayout::from_positions(&[
        GridPos::new(0, 0),
        GridPos::new(1, 0),
        GridPos::new(0, 1),
        GridPos::new(1, 1),
    ])
    .expect("layout");
    let mapper = CoordinateMapper::new(&plan, layout.min());

    assert_eq!(plan.level(0).tile_dims, [120, 120, 1]);
    assert_eq!(plan.level(0).margin_translation, DVec3::new(10.0, 10.0, 0.0));
    assert_eq!(mapper.global_interval(&layout, 0).dimensions(), [240, 240, 1]);
    assert_eq!(plan.tile_real_dimensions().x, 120.0);
}

#[test]
fn padded_size_rounds_up_to_factor_product() {
    // 3 levels of factor 2: every level-0 tile size must be a multiple of 4
    let plan = PyramidPlan::plan(&mipmap_input(101, 98, 3), 0.0).expect("plan");
    assert_eq!(plan.level(0).tile_dims, [104, 100, 1]);
    assert_eq!(plan.level(1).tile_dims, [52, 50, 1]);
    assert_eq!(plan.level(2).tile_dims, [26, 25, 1]);
    assert_eq!(plan.level(1).downsampling_factor, DVec3::new(2.0, 2.0, 1.0));
    assert_eq!(plan.level(2).mipmap_scale, DVec3::new(4.0, 4.0, 1.0));
    // native 51 voxels centered in a 52 voxel cell
    assert_eq!(plan.level(1).margin_translation.x, 0.5);
    assert_eq!(plan.level(1).integer_margin(), [0, 0, 0]);
    assert_eq!(plan.level(0).integer_margin(), [1, 1, 0]);
}

#[test]
fn fractional_padding_rounds_up_to_a_whole_voxel() {
    // 101 * 1.2 = 121.2 voxels of padded extent need a 122 voxel cell
    let plan = PyramidPlan::plan(&mipmap_input(101, 100, 1), 0.1).expect("plan");
    assert_eq!(plan.level(0).tile_dims, [122, 120, 1]);
    assert_eq!(plan.level(0).margin_translation.x, 10.5);
    assert_eq!(plan.level(0).integer_margin(), [10, 10, 0]);
}

#[test]
fn divisibility_holds_at_every_level() {
    for margin in [0.0, 0.05, 0.1, 0.25, 0.5] {
        for (width, height) in [(100, 100), (97, 131), (512, 384), (7, 9)] {
            let plan = PyramidPlan::plan(&mipmap_input(width, height, 4), margin).expect("plan");
            for level in 1..plan.num_levels() {
                let previous = plan.level(level - 1).tile_dims;
                let current = plan.level(level);
                for d in 0..3 {
                    let factor = current.downsampling_factor[d] as u64;
                    assert_eq!(previous[d] % factor, 0, "level {level} axis {d}");
                    assert_eq!(previous[d] / factor, current.tile_dims[d]);
                }
            }
        }
    }
}

#[test]
fn source_transform_scales_levels_and_centers_voxels() {
    let input = PyramidInput {
        level_transforms: vec![
            DAffine3::from_translation(DVec3::new(7.0, 7.0, 7.0))
                * DAffine3::from_scale(DVec3::new(0.5, 0.5, 1.0)),
            DAffine3::from_scale(DVec3::new(1.0, 1.0, 1.0)),
        ],
        level_dimensions: vec![[100, 100, 1], [50, 50, 1]],
    };
    let plan = PyramidPlan::plan(&input, 0.0).expect("plan");

    // level 0 drops the metadata translation
    assert_eq!(plan.level(0).source_transform.translation, DVec3::ZERO);
    let level_one = plan.level(1).source_transform;
    assert_eq!(level_one.matrix3.x_axis.x, 1.0);
    // half a level-1 voxel in level-0 voxels, times the level-0 voxel size
    assert_eq!(level_one.translation, DVec3::new(0.25, 0.25, 0.0));
}

#[test]
fn inconsistent_factors_are_rejected() {
    let input = PyramidInput {
        level_transforms: vec![
            DAffine3::from_scale(DVec3::ONE),
            DAffine3::from_scale(DVec3::new(2.0, 2.0, 1.0)),
            DAffine3::from_scale(DVec3::new(0.0, 4.0, 1.0)),
        ],
        level_dimensions: vec![[100, 100, 1], [50, 50, 1], [25, 25, 1]],
    };
    assert_eq!(
        PyramidPlan::plan(&input, 0.0),
        Err(GeometryError::DegenerateTransform { level: 2, dim: 0 })
    );
    assert_eq!(
        PyramidPlan::plan(&mipmap_input(10, 10, 1), -0.1),
        Err(GeometryError::InvalidMargin(-0.1))
    );
    assert_eq!(
        PyramidPlan::plan(
            &PyramidInput {
                level_transforms: vec![],
                level_dimensions: vec![],
            },
            0.0
        ),
        Err(GeometryError::NoLevels)
    );
}

#[test]
fn sub_voxel_rounding_is_tolerated() {
    // factor 1.5 cannot divide the tile size exactly
    let input = PyramidInput {
        level_transforms: vec![
            DAffine3::from_scale(DVec3::ONE),
            DAffine3::from_scale(DVec3::new(1.5, 1.5, 1.0)),
        ],
        level_dimensions: vec![[100, 100, 1], [67, 67, 1]],
    };
    let plan = PyramidPlan::plan(&input, 0.0).expect("plan");
    assert_eq!(plan.level(0).tile_dims, [100, 100, 1]);
    assert_eq!(plan.level(1).tile_dims, [67, 67, 1]);
}

#[test]
fn coordinate_round_trip_for_every_grid_cell() {
    let plan = PyramidPlan::plan(&mipmap_input(100, 80, 3), 0.1).expect("plan");
    let positions = [GridPos::new(-2, 3), GridPos::new(0, 5), GridPos::new(4, 4)];
    let layout = GridLayout::from_positions(&positions).expect("layout");
    let mapper = CoordinateMapper::new(&plan, layout.min());

    for level in 0..plan.num_levels() {
        for grid in positions {
            let interval = mapper.grid_to_global_interval(grid, level);
            let location = mapper.to_tile_index(interval.min, level);
            assert_eq!(
                (location.tile_x, location.tile_y),
                (
                    (grid.x - layout.min().x) as i64,
                    (grid.y - layout.min().y) as i64
                )
            );
            assert_eq!(location.local, [0, 0, 0]);

            let last = [interval.max[0] - 1, interval.max[1] - 1, 0];
            let inside = mapper.to_tile_index(last, level);
            assert_eq!((inside.tile_x, inside.tile_y), (location.tile_x, location.tile_y));
            let dims = mapper.tile_dims(level);
            assert_eq!(inside.local, [dims[0] as i64 - 1, dims[1] as i64 - 1, 0]);
        }
    }
}

#[test]
fn negative_coordinates_map_to_negative_tiles() {
    let plan = PyramidPlan::plan(&mipmap_input(10, 10, 1), 0.0).expect("plan");
    let mapper = CoordinateMapper::new(&plan, GridPos::new(0, 0));
    let location = mapper.to_tile_index([-1, 25, 3], 0);
    assert_eq!(location, TileLocation {
        tile_x: -1,
        tile_y: 2,
        local: [9, 5, 3],
    });
}
