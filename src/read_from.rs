use std::io::{self, Read, Seek, SeekFrom};
use std::str;
use byteorder::{ReadBytesExt, LE};

pub trait ReadFrom: Sized {
    fn read_from<R: Read + ?Sized>(r: &mut R) -> io::Result<Self>;
}

macro_rules! read_byteorder {
    ($($ty:ty, $read_one:ident;)*) => {
        $(
            impl ReadFrom for $ty {
                fn read_from<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
                    r.$read_one::<LE>()
                }
            }
        )*
    };
}

read_byteorder! {
    u16, read_u16;
    u32, read_u32;
    u64, read_u64;
    i16, read_i16;
    i32, read_i32;
    i64, read_i64;
    f32, read_f32;
    f64, read_f64;
}

impl ReadFrom for u8 {
    fn read_from<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
        r.read_u8()
    }
}

impl ReadFrom for i8 {
    fn read_from<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
        r.read_i8()
    }
}

impl<T: ReadFrom + Copy + Default, const N: usize> ReadFrom for [T; N] {
    fn read_from<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
        let mut out = [T::default(); N];
        for x in out.iter_mut() {
            *x = T::read_from(r)?;
        }
        Ok(out)
    }
}

pub trait ReadExt: Read {
    fn read_one<T: ReadFrom>(&mut self) -> io::Result<T> {
        T::read_from(self)
    }

    fn read_many<T: ReadFrom>(&mut self, n: usize) -> io::Result<Vec<T>> {
        let mut v = Vec::with_capacity(n);
        for _ in 0 .. n {
            v.push(self.read_one()?);
        }
        Ok(v)
    }

    /// Read a string stored as a `u16` byte length followed by that many
    /// UTF-8 bytes and a NUL terminator.
    fn read_len_str(&mut self) -> io::Result<String> {
        let len: u16 = self.read_one()?;
        let mut buf = vec![0; len as usize];
        self.read_exact(&mut buf)?;
        let _nul: u8 = self.read_one()?;
        let s = str::from_utf8(&buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(s.to_owned())
    }
}

impl<R: Read + ?Sized> ReadExt for R {}

pub trait SeekExt: Read + Seek {
    fn read_one_at<T: ReadFrom>(&mut self, offset: u64) -> io::Result<T> {
        self.seek(SeekFrom::Start(offset))?;
        T::read_from(self)
    }

    fn read_many_at<T: ReadFrom>(&mut self, offset: u64, n: usize) -> io::Result<Vec<T>> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_many(n)
    }

    fn read_len_str_at(&mut self, offset: u64) -> io::Result<String> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_len_str()
    }
}

impl<R: Read + Seek + ?Sized> SeekExt for R {}
