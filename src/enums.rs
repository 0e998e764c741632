/// Axis along which a slice is cut out of a [`crate::volume::Volume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

/// What to do with slices whose origins drift along the column direction
/// the way a tilted CT gantry produces them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum GantryTiltHandling {
    /// Keep them in one block and flag the block for tilt correction.
    #[default]
    Group,
    /// Split them like any other irregular slice.
    Split,
}

/// What to do with blocks that cover exactly the same positions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TimeSeriesHandling {
    /// Merge them into one 3D+t block.
    #[default]
    Merge,
    /// Return every 3D block separately.
    Separate,
}
