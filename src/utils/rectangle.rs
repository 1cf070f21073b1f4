/// A rectangle in display coordinates, defined by its edges
///
/// `right` and `bottom` are exclusive, so a rectangle with `left == right` is empty.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rectangle {
    /// horizontal position of the left edge
    pub left: i32,
    /// vertical position of the top edge
    pub top: i32,
    /// horizontal position of the right edge
    pub right: i32,
    /// vertical position of the bottom edge
    pub bottom: i32,
}

impl Rectangle {
    /// Create a rectangle from its edges
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Rectangle {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Create a rectangle from its top-left corner and dimensions
    ///
    /// Edges past the coordinate range are clamped to it.
    pub const fn from_loc_and_size(x: i32, y: i32, width: i32, height: i32) -> Self {
        Rectangle::new(x, y, x.saturating_add(width), y.saturating_add(height))
    }

    /// Width of the rectangle
    #[inline]
    pub fn width(&self) -> i64 {
        i64::from(self.right) - i64::from(self.left)
    }

    /// Height of the rectangle
    #[inline]
    pub fn height(&self) -> i64 {
        i64::from(self.bottom) - i64::from(self.top)
    }

    /// Number of pixels covered by the rectangle
    ///
    /// Degenerate rectangles (negative width or height) cover no pixels.
    #[inline]
    pub fn area(&self) -> u64 {
        let w = self.width().max(0) as u64;
        let h = self.height().max(0) as u64;
        w * h
    }
}

/// A rectangle in buffer coordinates with sub-pixel precision
///
/// Used for source crops, which may start or end between two pixels.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FRectangle {
    /// horizontal position of the left edge
    pub left: f32,
    /// vertical position of the top edge
    pub top: f32,
    /// horizontal position of the right edge
    pub right: f32,
    /// vertical position of the bottom edge
    pub bottom: f32,
}

impl FRectangle {
    /// Create a rectangle from its edges
    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        FRectangle {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Width of the rectangle
    #[inline]
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    /// Height of the rectangle
    #[inline]
    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

impl From<Rectangle> for FRectangle {
    fn from(rect: Rectangle) -> Self {
        FRectangle::new(
            rect.left as f32,
            rect.top as f32,
            rect.right as f32,
            rect.bottom as f32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::Rectangle;

    #[test]
    fn area_of_degenerate_rectangle_is_zero() {
        assert_eq!(Rectangle::new(10, 10, 5, 20).area(), 0);
        assert_eq!(Rectangle::new(0, 0, 0, 0).area(), 0);
    }

    #[test]
    fn area_uses_edges() {
        let rect = Rectangle::from_loc_and_size(100, 50, 1920, 1080);
        assert_eq!(rect.width(), 1920);
        assert_eq!(rect.height(), 1080);
        assert_eq!(rect.area(), 1920 * 1080);
    }

    #[test]
    fn extents_span_the_whole_coordinate_range() {
        let rect = Rectangle::new(i32::MIN, 0, i32::MAX, 10);
        assert_eq!(rect.width(), u32::MAX as i64);
        assert_eq!(rect.area(), u32::MAX as u64 * 10);

        let full = Rectangle::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX);
        assert_eq!(full.area(), u32::MAX as u64 * u32::MAX as u64);

        let clamped = Rectangle::from_loc_and_size(i32::MAX - 5, 0, 100, 100);
        assert_eq!(clamped.width(), 5);
    }
}
