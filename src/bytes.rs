use anyhow::{Context, Result};

pub(crate) fn read_u8_class(data: &[u8], offset: &mut usize) -> Result<u8> {
    let value = *data.get(*offset).context("class file truncated")?;
    *offset += 1;
    Ok(value)
}

pub(crate) fn read_u16_class(data: &[u8], offset: &mut usize) -> Result<u16> {
    let value = read_u16(data, *offset).context("class file truncated")?;
    *offset += 2;
    Ok(value)
}

pub(crate) fn read_u32_class(data: &[u8], offset: &mut usize) -> Result<u32> {
    let value = read_u32(data, *offset).context("class file truncated")?;
    *offset += 4;
    Ok(value)
}

pub(crate) fn read_bytes_class<'a>(
    data: &'a [u8],
    offset: &mut usize,
    len: usize,
) -> Result<&'a [u8]> {
    let end = offset.checked_add(len).context("class file length overflow")?;
    let slice = data.get(*offset..end).context("class file truncated")?;
    *offset = end;
    Ok(slice)
}

pub(crate) fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let slice = code
        .get(offset..offset + 2)
        .context("bytecode u16 out of bounds")?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

pub(crate) fn read_u32(code: &[u8], offset: usize) -> Result<u32> {
    let slice = code
        .get(offset..offset + 4)
        .context("bytecode u32 out of bounds")?;
    Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

pub(crate) fn read_i16(code: &[u8], offset: usize) -> Result<i16> {
    let value = read_u16(code, offset)?;
    Ok(i16::from_be_bytes(value.to_be_bytes()))
}

pub(crate) fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let value = read_u32(code, offset)?;
    Ok(i32::from_be_bytes(value.to_be_bytes()))
}

pub(crate) fn write_u1(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub(crate) fn write_u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_u4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_i2(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_i4(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Switch operands start on a 4-byte boundary relative to the start of the code array.
pub(crate) fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}
