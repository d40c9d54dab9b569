//! NumPy `.npy` files of RF signals and images

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use nalgebra::DMatrix;
use npyz::{AutoSerialize, Deserialize, NpyFile, Order, WriteOptions, WriterBuilder};

#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("Failed to open {1:?}")]
    Open(#[source] std::io::Error, PathBuf),
    #[error("Failed to read or write the NumPy array")]
    Npy(#[from] std::io::Error),
    #[error("Expected a 1-D or 2-D array, found shape {0:?}")]
    Shape(Vec<u64>),
}
type Result<T> = std::result::Result<T, IoError>;

/// Saves a matrix to a `.npy` file (Fortran order)
pub fn save_matrix<T, P>(path: P, matrix: &DMatrix<T>) -> Result<()>
where
    T: AutoSerialize + nalgebra::Scalar + Copy,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| IoError::Open(e, path.to_path_buf()))?;
    let mut writer = WriteOptions::new()
        .default_dtype()
        .order(Order::Fortran)
        .shape(&[matrix.nrows() as u64, matrix.ncols() as u64])
        .writer(BufWriter::new(file))
        .begin_nd()?;
    writer.extend(matrix.iter().copied())?;
    writer.finish()?;
    log::info!("{:?} array saved to {:?}", matrix.shape(), path);
    Ok(())
}

/// Saves a vector to a `.npy` file
pub fn save_vec<T, P>(path: P, data: &[T]) -> Result<()>
where
    T: AutoSerialize + Copy,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| IoError::Open(e, path.to_path_buf()))?;
    let mut writer = WriteOptions::new()
        .default_dtype()
        .shape(&[data.len() as u64])
        .writer(BufWriter::new(file))
        .begin_nd()?;
    writer.extend(data.iter().copied())?;
    writer.finish()?;
    Ok(())
}

/// Loads a 1-D (as a column) or 2-D array from a `.npy` file
pub fn load_matrix<T, P>(path: P) -> Result<DMatrix<T>>
where
    T: Deserialize + nalgebra::Scalar,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| IoError::Open(e, path.to_path_buf()))?;
    let npy = NpyFile::new(BufReader::new(file))?;
    let shape = npy.shape().to_vec();
    let order = npy.order();
    let data: Vec<T> = npy.into_vec()?;
    let matrix = match (shape.as_slice(), order) {
        ([n], _) => DMatrix::from_vec(*n as usize, 1, data),
        ([n, m], Order::Fortran) => DMatrix::from_vec(*n as usize, *m as usize, data),
        ([n, m], Order::C) => DMatrix::from_row_slice(*n as usize, *m as usize, &data),
        _ => return Err(IoError::Shape(shape)),
    };
    log::debug!("{:?} array loaded from {:?}", matrix.shape(), path);
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_major_layout() {
        let path = std::env::temp_dir().join("must-toolbox-io-test.npy");
        let m = DMatrix::from_row_slice(2, 3, &[1., 2., 3., 4., 5., 6.]);
        save_matrix(&path, &m).unwrap();
        let loaded: DMatrix<f64> = load_matrix(&path).unwrap();
        assert_eq!(loaded, m);
        assert_eq!(loaded[(1, 0)], 4.);
        std::fs::remove_file(path).unwrap();
        assert!(matches!(
            load_matrix::<f64, _>("no-such-file.npy"),
            Err(IoError::Open(..))
        ));
    }
}
