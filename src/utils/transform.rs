/// Transformation applied by a plane when scanning out a buffer
#[derive(Debug, Default, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Transform {
    /// Buffer is scanned out unaltered
    #[default]
    Normal,
    /// Rotated by 90 degrees
    _90,
    /// Rotated by 180 degrees
    _180,
    /// Rotated by 270 degrees
    _270,
    /// Flipped horizontally
    Flipped,
    /// Flipped horizontally and rotated by 90 degrees
    Flipped90,
    /// Flipped horizontally and rotated by 180 degrees
    Flipped180,
    /// Flipped horizontally and rotated by 270 degrees
    Flipped270,
}
