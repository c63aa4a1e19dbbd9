//! Dense row-major 2-D buffers.
//!
//! Row 0 is the top row of the image. Every stage of the pipeline (oversampled
//! energy map, reduced map, phase images, result) is a `Grid` of small fixed
//! channel arrays.

/// Channel index of the first tap energy in a four-channel texel.
pub const CH_A: usize = 0;
/// Channel index of the second tap energy.
pub const CH_B: usize = 1;
/// Channel index of the raw depth (meters).
pub const CH_DEPTH: usize = 2;
/// Channel index of the raw energy.
pub const CH_ENERGY: usize = 3;

/// One oversampled/reduced/phase texel: `[a, b, depth, energy]`.
pub type Texel = [f32; 4];

#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

impl<T: Copy + Default> Grid<T> {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![T::default(); width * height],
        }
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    /// Reallocate to a new size. Contents are reset.
    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.data.clear();
        self.data.resize(width * height, T::default());
    }
}

impl<T> Grid<T> {
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Option<Self> {
        (data.len() == width * height).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &T {
        &self.data[y * self.width + x]
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        &mut self.data[y * self.width + x]
    }

    pub fn row(&self, y: usize) -> &[T] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn same_size<U>(&self, other: &Grid<U>) -> bool {
        self.width == other.width && self.height == other.height
    }
}

/// Pull one channel out of a multi-channel grid.
pub fn channel<const N: usize>(grid: &Grid<[f32; N]>, c: usize) -> Grid<f32> {
    Grid {
        width: grid.width,
        height: grid.height,
        data: grid.data.iter().map(|t| t[c]).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_top_first() {
        let g = Grid::from_vec(3, 2, vec![0, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(*g.get(0, 1), 3);
        assert_eq!(g.row(0), &[0, 1, 2]);
        assert_eq!(g.row(1), &[3, 4, 5]);
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        assert!(Grid::from_vec(2, 2, vec![0.0f32; 3]).is_none());
    }

    #[test]
    fn test_resize_resets() {
        let mut g: Grid<f32> = Grid::new(2, 2);
        g.fill(3.0);
        g.resize(4, 1);
        assert_eq!(g.width(), 4);
        assert_eq!(g.height(), 1);
        assert!(g.as_slice().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_channel_extract() {
        let g = Grid::from_vec(2, 1, vec![[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]]).unwrap();
        let c = channel(&g, CH_DEPTH);
        assert_eq!(c.as_slice(), &[3.0, 7.0]);
    }
}
