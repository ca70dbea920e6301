use engine::SchedulerError;
use model::{GridLayoutError, GridPos};
use pyramid::GeometryError;

#[derive(Debug, thiserror::Error)]
pub enum StitchError {
    #[error("no tiles to stitch")]
    EmptyCatalog,
    #[error("{tiles} tiles but {positions} grid positions")]
    PositionCountMismatch { tiles: usize, positions: usize },
    #[error("grid position {0:?} is assigned to more than one tile")]
    DuplicateGridPosition(GridPos),
    #[error("'{0}' is a stitched image and cannot be stitched again")]
    NestedStitching(String),
    #[error("invalid grid layout: {0}")]
    Layout(GridLayoutError),
    #[error("inconsistent tile geometry: {0}")]
    Geometry(#[from] GeometryError),
    #[error("{0} resolution levels exceed what the tile cache can address")]
    TooManyLevels(usize),
    #[error("invalid stitch configuration: {0}")]
    Config(String),
    #[error("could not start tile loading: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("an image named '{0}' is already registered")]
    DuplicateName(String),
}

impl From<GridLayoutError> for StitchError {
    fn from(error: GridLayoutError) -> Self {
        match error {
            GridLayoutError::Empty => StitchError::EmptyCatalog,
            GridLayoutError::DuplicatePosition(pos) => StitchError::DuplicateGridPosition(pos),
            other => StitchError::Layout(other),
        }
    }
}
