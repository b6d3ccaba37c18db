//! Index-grid construction for 2D positional lookups.

use candle_core::{Result, Tensor};

/// Build a pair of (H, W) coordinate grids from two 1-D index vectors,
/// with "ij" indexing: the first grid repeats `rows` across columns, the
/// second repeats `cols` across rows.
pub fn meshgrid_ij(rows: &Tensor, cols: &Tensor) -> Result<(Tensor, Tensor)> {
    let h = rows.dims1()?;
    let w = cols.dims1()?;
    let row_grid = rows.reshape((h, 1))?.broadcast_as((h, w))?;
    let col_grid = cols.reshape((1, w))?.broadcast_as((h, w))?;
    Ok((row_grid, col_grid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_meshgrid_ij() -> Result<()> {
        let device = Device::Cpu;
        let rows = Tensor::arange(0u32, 3, &device)?;
        let cols = Tensor::arange(0u32, 2, &device)?;

        let (row_grid, col_grid) = meshgrid_ij(&rows, &cols)?;

        assert_eq!(row_grid.dims(), &[3, 2]);
        assert_eq!(col_grid.dims(), &[3, 2]);
        assert_eq!(
            row_grid.to_vec2::<u32>()?,
            vec![vec![0, 0], vec![1, 1], vec![2, 2]]
        );
        assert_eq!(
            col_grid.to_vec2::<u32>()?,
            vec![vec![0, 1], vec![0, 1], vec![0, 1]]
        );
        Ok(())
    }

    #[test]
    fn test_meshgrid_rejects_non_vector_input() -> Result<()> {
        let device = Device::Cpu;
        let rows = Tensor::zeros((2, 2), candle_core::DType::U32, &device)?;
        let cols = Tensor::arange(0u32, 2, &device)?;

        assert!(meshgrid_ij(&rows, &cols).is_err());
        Ok(())
    }
}
