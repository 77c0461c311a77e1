//! Matrix shapes.
//!
//! Every buffer in the graph is a dense column-major array: element `(i, j)`
//! of an `r x c` matrix lives at flat index `i + j * r`.

use std::fmt;

/// A `(rows, cols)` matrix shape.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape {
    rows: usize,
    cols: usize,
}

impl Shape {
    /// Create a new shape.
    pub fn new(rows: usize, cols: usize) -> Self {
        Shape { rows, cols }
    }

    /// The 1x1 shape.
    pub fn scalar() -> Self {
        Shape { rows: 1, cols: 1 }
    }

    /// Column vector shape `(n, 1)`.
    pub fn column(n: usize) -> Self {
        Shape { rows: n, cols: 1 }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of entries (`rows * cols`).
    pub fn numel(&self) -> usize {
        self.rows * self.cols
    }

    /// Check if this is a 1x1 shape.
    pub fn is_scalar(&self) -> bool {
        self.rows == 1 && self.cols == 1
    }

    /// Check if the shape holds no entries.
    pub fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    /// Shape with rows and columns swapped.
    pub fn transposed(&self) -> Shape {
        Shape {
            rows: self.cols,
            cols: self.rows,
        }
    }

    /// Flat column-major index of entry `(i, j)`.
    pub fn index(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < self.rows && j < self.cols);
        i + j * self.rows
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({}x{})", self.rows, self.cols)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

impl From<(usize, usize)> for Shape {
    fn from((rows, cols): (usize, usize)) -> Self {
        Shape::new(rows, cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_basics() {
        let s = Shape::new(2, 3);
        assert_eq!(s.rows(), 2);
        assert_eq!(s.cols(), 3);
        assert_eq!(s.numel(), 6);
        assert!(!s.is_scalar());
        assert!(!s.is_empty());
    }

    #[test]
    fn test_scalar_and_empty() {
        assert!(Shape::scalar().is_scalar());
        assert_eq!(Shape::scalar().numel(), 1);
        assert!(Shape::new(0, 4).is_empty());
        assert!(Shape::new(3, 0).is_empty());
    }

    #[test]
    fn test_transposed() {
        assert_eq!(Shape::new(2, 5).transposed(), Shape::new(5, 2));
        assert_eq!(Shape::column(4).transposed(), Shape::new(1, 4));
    }

    #[test]
    fn test_column_major_index() {
        let s = Shape::new(2, 3);
        assert_eq!(s.index(0, 0), 0);
        assert_eq!(s.index(1, 0), 1);
        assert_eq!(s.index(0, 1), 2);
        assert_eq!(s.index(1, 2), 5);
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::new(2, 3).to_string(), "2x3");
        assert_eq!(format!("{:?}", Shape::scalar()), "Shape(1x1)");
        assert_eq!(Shape::from((4, 1)), Shape::column(4));
    }
}
