//! Wire primitives and field descriptors.
//!
//! All integers are big-endian. Strings and arrays carry a `u16` length
//! prefix. A type can appear as a packet field only if it implements
//! [`WireField`]; anything else (nested `Vec`s, `Option`s, maps) fails to
//! compile inside a `packet!` declaration.
//!
//! There is no null array on the wire: an empty `Vec` is written as a
//! zero count and that is the only way to express "no elements".

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{NetError, NetResult};

/// Scalar kinds with a fixed width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Char,
}

impl Primitive {
    /// Encoded width in bytes.
    pub const fn width(self) -> usize {
        match self {
            Primitive::Bool | Primitive::I8 | Primitive::U8 => 1,
            Primitive::I16 | Primitive::U16 => 2,
            Primitive::I32 | Primitive::U32 | Primitive::F32 | Primitive::Char => 4,
            Primitive::I64 | Primitive::U64 | Primitive::F64 => 8,
        }
    }
}

/// Kind of an array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Primitive(Primitive),
    Str,
    /// Nested packet body, by type name.
    Nested(&'static str),
}

/// Kind of a declared packet field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Primitive(Primitive),
    Str,
    Nested(&'static str),
    Array(ElementKind),
}

/// One entry of a packet type's ordered field list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDesc {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Growable big-endian writer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn put_i8(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32(v);
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.put_f64(v);
    }

    pub fn put_slice(&mut self, v: &[u8]) {
        self.buf.put_slice(v);
    }

    /// Writes a `u16` length prefix.
    pub fn put_len(&mut self, len: usize, what: &'static str) -> NetResult<()> {
        let len16 = u16::try_from(len).map_err(|_| NetError::TooLong { what, len })?;
        self.buf.put_u16(len16);
        Ok(())
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn put_str(&mut self, v: &str) -> NetResult<()> {
        self.put_len(v.len(), "string")?;
        self.buf.put_slice(v.as_bytes());
        Ok(())
    }
}

/// Bounds-checked big-endian reader over a borrowed frame.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

macro_rules! get_fixed {
    ($name:ident, $ty:ty, $width:expr, $get:ident) => {
        pub fn $name(&mut self) -> NetResult<$ty> {
            self.need($width)?;
            Ok(self.buf.$get())
        }
    };
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn need(&self, needed: usize) -> NetResult<()> {
        if self.buf.len() < needed {
            return Err(NetError::Truncated {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    pub fn get_bool(&mut self) -> NetResult<bool> {
        Ok(self.get_u8()? != 0)
    }

    get_fixed!(get_i8, i8, 1, get_i8);
    get_fixed!(get_u8, u8, 1, get_u8);
    get_fixed!(get_i16, i16, 2, get_i16);
    get_fixed!(get_u16, u16, 2, get_u16);
    get_fixed!(get_i32, i32, 4, get_i32);
    get_fixed!(get_u32, u32, 4, get_u32);
    get_fixed!(get_i64, i64, 8, get_i64);
    get_fixed!(get_u64, u64, 8, get_u64);
    get_fixed!(get_f32, f32, 4, get_f32);
    get_fixed!(get_f64, f64, 8, get_f64);

    /// Borrows the next `len` bytes.
    pub fn take(&mut self, len: usize) -> NetResult<&'a [u8]> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Borrows everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    pub fn get_len(&mut self) -> NetResult<usize> {
        Ok(usize::from(self.get_u16()?))
    }

    pub fn get_string(&mut self) -> NetResult<String> {
        let len = self.get_len()?;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| NetError::InvalidUtf8)
    }
}

/// A type that can be a packet field.
pub trait WireField: Sized {
    const KIND: FieldKind;

    fn write_to(&self, w: &mut WireWriter) -> NetResult<()>;

    fn read_from(r: &mut WireReader<'_>) -> NetResult<Self>;
}

/// A field type that may also appear as an array element.
pub trait WireElement: WireField {
    const ELEMENT: ElementKind;
}

macro_rules! primitive_field {
    ($ty:ty, $kind:ident, $put:ident, $get:ident) => {
        impl WireField for $ty {
            const KIND: FieldKind = FieldKind::Primitive(Primitive::$kind);

            fn write_to(&self, w: &mut WireWriter) -> NetResult<()> {
                w.$put(*self);
                Ok(())
            }

            fn read_from(r: &mut WireReader<'_>) -> NetResult<Self> {
                r.$get()
            }
        }

        impl WireElement for $ty {
            const ELEMENT: ElementKind = ElementKind::Primitive(Primitive::$kind);
        }
    };
}

primitive_field!(bool, Bool, put_bool, get_bool);
primitive_field!(i8, I8, put_i8, get_i8);
primitive_field!(u8, U8, put_u8, get_u8);
primitive_field!(i16, I16, put_i16, get_i16);
primitive_field!(u16, U16, put_u16, get_u16);
primitive_field!(i32, I32, put_i32, get_i32);
primitive_field!(u32, U32, put_u32, get_u32);
primitive_field!(i64, I64, put_i64, get_i64);
primitive_field!(u64, U64, put_u64, get_u64);
primitive_field!(f32, F32, put_f32, get_f32);
primitive_field!(f64, F64, put_f64, get_f64);

impl WireField for char {
    const KIND: FieldKind = FieldKind::Primitive(Primitive::Char);

    fn write_to(&self, w: &mut WireWriter) -> NetResult<()> {
        w.put_u32(u32::from(*self));
        Ok(())
    }

    fn read_from(r: &mut WireReader<'_>) -> NetResult<Self> {
        let code = r.get_u32()?;
        char::from_u32(code).ok_or(NetError::InvalidChar(code))
    }
}

impl WireElement for char {
    const ELEMENT: ElementKind = ElementKind::Primitive(Primitive::Char);
}

impl WireField for String {
    const KIND: FieldKind = FieldKind::Str;

    fn write_to(&self, w: &mut WireWriter) -> NetResult<()> {
        w.put_str(self)
    }

    fn read_from(r: &mut WireReader<'_>) -> NetResult<Self> {
        r.get_string()
    }
}

impl WireElement for String {
    const ELEMENT: ElementKind = ElementKind::Str;
}

impl<T: WireElement> WireField for Vec<T> {
    const KIND: FieldKind = FieldKind::Array(T::ELEMENT);

    fn write_to(&self, w: &mut WireWriter) -> NetResult<()> {
        w.put_len(self.len(), "array")?;
        for item in self {
            item.write_to(w)?;
        }
        Ok(())
    }

    fn read_from(r: &mut WireReader<'_>) -> NetResult<Self> {
        let len = r.get_len()?;
        let mut out = Vec::with_capacity(len.min(r.remaining()));
        for _ in 0..len {
            out.push(T::read_from(r)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_big_endian() {
        let mut w = WireWriter::new();
        w.put_i16(0x0102);
        w.put_u32(0x0A0B_0C0D);
        assert_eq!(w.as_slice(), &[0x01, 0x02, 0x0A, 0x0B, 0x0C, 0x0D]);
    }

    #[test]
    fn empty_array_is_a_zero_count() {
        let mut w = WireWriter::new();
        Vec::<i32>::new().write_to(&mut w).unwrap();
        assert_eq!(w.as_slice(), &[0, 0]);

        let mut r = WireReader::new(w.as_slice());
        assert!(Vec::<i32>::read_from(&mut r).unwrap().is_empty());
        assert!(r.is_empty());
    }

    #[test]
    fn string_array_round_trip() {
        let words = vec!["alpha".to_string(), String::new(), "γάμμα".to_string()];
        let mut w = WireWriter::new();
        words.write_to(&mut w).unwrap();

        let mut r = WireReader::new(w.as_slice());
        assert_eq!(Vec::<String>::read_from(&mut r).unwrap(), words);
    }

    #[test]
    fn truncated_input_is_reported() {
        let mut r = WireReader::new(&[0x00]);
        match r.get_i32() {
            Err(NetError::Truncated { needed, remaining }) => {
                assert_eq!((needed, remaining), (4, 1));
            }
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[test]
    fn oversized_string_is_rejected() {
        let long = "x".repeat(usize::from(u16::MAX) + 1);
        let mut w = WireWriter::new();
        assert!(matches!(
            w.put_str(&long),
            Err(NetError::TooLong { what: "string", .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut r = WireReader::new(&[0x00, 0x02, 0xC3, 0x28]);
        assert!(matches!(r.get_string(), Err(NetError::InvalidUtf8)));
    }

    #[test]
    fn array_kind_describes_element() {
        assert_eq!(
            <Vec<f64> as WireField>::KIND,
            FieldKind::Array(ElementKind::Primitive(Primitive::F64))
        );
        assert_eq!(<Vec<String> as WireField>::KIND, FieldKind::Array(ElementKind::Str));
        assert_eq!(Primitive::Char.width(), 4);
    }
}
