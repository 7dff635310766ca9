//! Little-endian primitives for the persisted model layout.

use std::io::{Read, Write};

use crate::error::{Error, Result};

pub fn write_u8<W: Write>(w: &mut W, value: u8) -> Result<()> {
    w.write_all(&[value])?;
    Ok(())
}

pub fn write_i16<W: Write>(w: &mut W, value: i16) -> Result<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn write_i32<W: Write>(w: &mut W, value: i32) -> Result<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn write_f32<W: Write>(w: &mut W, value: f32) -> Result<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn write_f64<W: Write>(w: &mut W, value: f64) -> Result<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Writes `int32 n` followed by `n` float64 values.
pub fn write_f64_seq<W, I>(w: &mut W, values: I) -> Result<()>
where
    W: Write,
    I: ExactSizeIterator<Item = f64>,
{
    write_i32(w, length_to_i32(values.len())?)?;
    for v in values {
        write_f64(w, v)?;
    }
    Ok(())
}

pub fn read_u8<R: Read>(r: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn read_i16<R: Read>(r: &mut R) -> Result<i16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(i16::from_le_bytes(buf))
}

pub fn read_i32<R: Read>(r: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub fn read_f32<R: Read>(r: &mut R) -> Result<f32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

pub fn read_f64<R: Read>(r: &mut R) -> Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

/// Reads a non-negative `int32` length.
pub fn read_len<R: Read>(r: &mut R) -> Result<usize> {
    let n = read_i32(r)?;
    usize::try_from(n).map_err(|_| Error::Persistence(format!("negative length {}", n)))
}

/// Reads `int32 n` followed by `n` float64 values.
pub fn read_f64_seq<R: Read>(r: &mut R) -> Result<Vec<f64>> {
    let n = read_len(r)?;
    (0..n).map(|_| read_f64(r)).collect()
}

pub fn length_to_i32(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| Error::Persistence(format!("length {} overflows int32", len)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_little_endian_layout() {
        let mut buf = Vec::new();
        write_i32(&mut buf, 1).unwrap();
        write_i16(&mut buf, 2).unwrap();
        assert_eq!(buf, vec![1, 0, 0, 0, 2, 0]);
    }

    #[test]
    fn test_seq_and_truncation() {
        let mut buf = Vec::new();
        write_f64_seq(&mut buf, [0.25, -1.5].into_iter()).unwrap();
        let mut cursor = Cursor::new(buf.clone());
        assert_eq!(read_f64_seq(&mut cursor).unwrap(), vec![0.25, -1.5]);

        buf.truncate(buf.len() - 3);
        let mut cursor = Cursor::new(buf);
        assert!(matches!(read_f64_seq(&mut cursor), Err(Error::Persistence(_))));
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut buf = Vec::new();
        write_i32(&mut buf, -4).unwrap();
        let mut cursor = Cursor::new(buf);
        assert!(matches!(read_len(&mut cursor), Err(Error::Persistence(_))));
    }
}
