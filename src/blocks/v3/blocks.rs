use crate::{
    Error, Result,
    blocks::common::{
        read_f64, read_u16, read_u32, read_u64, read_fixed_str, validate_buffer_size,
        write_fixed_str,
    },
    conversion::Conversion,
    model::DataType,
};

pub(crate) const HD3_BLOCK_LEN: usize = 208;
pub(crate) const DG3_BLOCK_LEN: usize = 28;
pub(crate) const CG3_BLOCK_LEN: usize = 30;
pub(crate) const CN3_BLOCK_LEN: usize = 228;

pub(crate) const CHANNEL_TYPE_MASTER3: u16 = 1;

/// Identity conversion marker in the 3.x layout.
pub(crate) const CC3_TYPE_IDENTITY: u16 = 0xffff;
pub(crate) const CC3_TYPE_LINEAR: u16 = 0;
pub(crate) const CC3_TYPE_TAB_INTERP: u16 = 1;
pub(crate) const CC3_TYPE_TAB: u16 = 2;
pub(crate) const CC3_TYPE_RATIONAL: u16 = 9;
pub(crate) const CC3_TYPE_FORMULA: u16 = 10;

fn check_id(bytes: &[u8], id: &'static str, min_len: usize) -> Result<()> {
    validate_buffer_size(bytes, min_len, file!(), line!())?;
    if &bytes[..2] != id.as_bytes() {
        return Err(Error::BlockId {
            actual: bytes[..2].iter().map(|&b| b as char).collect(),
            expected: id,
        });
    }
    Ok(())
}

/// `HD`: 3.x file header with inline date/time text and, from 3.20 on,
/// an absolute nanosecond start time.
#[derive(Debug, Clone)]
pub(crate) struct Hd3Block {
    pub dg_first: u32,
    pub comment: u32,
    pub abs_time_ns: u64,
}

impl Hd3Block {
    pub const DG_FIRST_OFFSET: u64 = 4;
    pub const COMMENT_OFFSET: u64 = 8;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_id(bytes, "HD", 164)?;
        let block_len = read_u16(bytes, 2)? as usize;
        let abs_time_ns = if block_len >= 172 {
            read_u64(bytes, 164)?
        } else {
            0
        };
        Ok(Hd3Block {
            dg_first: read_u32(bytes, 4)?,
            comment: read_u32(bytes, 8)?,
            abs_time_ns,
        })
    }

    pub fn to_bytes(&self, dg_count: u16) -> Vec<u8> {
        let mut buf = vec![0u8; HD3_BLOCK_LEN];
        buf[..2].copy_from_slice(b"HD");
        buf[2..4].copy_from_slice(&(HD3_BLOCK_LEN as u16).to_le_bytes());
        buf[4..8].copy_from_slice(&self.dg_first.to_le_bytes());
        buf[8..12].copy_from_slice(&self.comment.to_le_bytes());
        buf[16..18].copy_from_slice(&dg_count.to_le_bytes());
        // Inline date/time text mirrors the nanosecond timestamp; blank
        // strings are tolerated by readers so only the numeric form is
        // authoritative here.
        write_fixed_str(&mut buf[18..28], "01:01:1970");
        write_fixed_str(&mut buf[28..36], "00:00:00");
        buf[164..172].copy_from_slice(&self.abs_time_ns.to_le_bytes());
        buf
    }
}

/// `DG`: 3.x data group.
#[derive(Debug, Clone)]
pub(crate) struct Dg3Block {
    pub dg_next: u32,
    pub cg_first: u32,
    pub data: u32,
    pub cg_nr: u16,
    pub record_id_len: u16,
}

impl Dg3Block {
    pub const DG_NEXT_OFFSET: u64 = 4;
    pub const CG_FIRST_OFFSET: u64 = 8;
    pub const DATA_OFFSET: u64 = 16;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_id(bytes, "DG", DG3_BLOCK_LEN)?;
        Ok(Dg3Block {
            dg_next: read_u32(bytes, 4)?,
            cg_first: read_u32(bytes, 8)?,
            data: read_u32(bytes, 16)?,
            cg_nr: read_u16(bytes, 20)?,
            record_id_len: read_u16(bytes, 22)?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; DG3_BLOCK_LEN];
        buf[..2].copy_from_slice(b"DG");
        buf[2..4].copy_from_slice(&(DG3_BLOCK_LEN as u16).to_le_bytes());
        buf[4..8].copy_from_slice(&self.dg_next.to_le_bytes());
        buf[8..12].copy_from_slice(&self.cg_first.to_le_bytes());
        buf[16..20].copy_from_slice(&self.data.to_le_bytes());
        buf[20..22].copy_from_slice(&self.cg_nr.to_le_bytes());
        buf[22..24].copy_from_slice(&self.record_id_len.to_le_bytes());
        buf
    }
}

/// `CG`: 3.x channel group.
#[derive(Debug, Clone)]
pub(crate) struct Cg3Block {
    pub cg_next: u32,
    pub cn_first: u32,
    pub comment: u32,
    pub cn_nr: u16,
    pub record_size: u16,
    pub cycles: u32,
}

impl Cg3Block {
    pub const CG_NEXT_OFFSET: u64 = 4;
    pub const CN_FIRST_OFFSET: u64 = 8;
    pub const COMMENT_OFFSET: u64 = 12;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_id(bytes, "CG", 26)?;
        Ok(Cg3Block {
            cg_next: read_u32(bytes, 4)?,
            cn_first: read_u32(bytes, 8)?,
            comment: read_u32(bytes, 12)?,
            cn_nr: read_u16(bytes, 18)?,
            record_size: read_u16(bytes, 20)?,
            cycles: read_u32(bytes, 22)?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; CG3_BLOCK_LEN];
        buf[..2].copy_from_slice(b"CG");
        buf[2..4].copy_from_slice(&(CG3_BLOCK_LEN as u16).to_le_bytes());
        buf[4..8].copy_from_slice(&self.cg_next.to_le_bytes());
        buf[8..12].copy_from_slice(&self.cn_first.to_le_bytes());
        buf[12..16].copy_from_slice(&self.comment.to_le_bytes());
        buf[18..20].copy_from_slice(&self.cn_nr.to_le_bytes());
        buf[20..22].copy_from_slice(&self.record_size.to_le_bytes());
        buf[22..26].copy_from_slice(&self.cycles.to_le_bytes());
        buf
    }
}

/// `CN`: 3.x channel with inline 32-char name and 128-char description.
#[derive(Debug, Clone)]
pub(crate) struct Cn3Block {
    pub cn_next: u32,
    pub conversion: u32,
    pub channel_type: u16,
    pub short_name: String,
    pub description: String,
    /// Field position in bits, relative to `additional_byte_offset`.
    pub start_offset: u16,
    pub bit_count: u16,
    pub data_type: u16,
    pub long_name: u32,
    pub additional_byte_offset: u16,
}

impl Cn3Block {
    pub const CN_NEXT_OFFSET: u64 = 4;
    pub const CONVERSION_OFFSET: u64 = 8;
    pub const LONG_NAME_OFFSET: u64 = 218;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_id(bytes, "CN", 218)?;
        let block_len = read_u16(bytes, 2)? as usize;
        let long_name = if block_len >= 222 { read_u32(bytes, 218)? } else { 0 };
        let additional_byte_offset = if block_len >= 228 {
            read_u16(bytes, 226)?
        } else {
            0
        };
        Ok(Cn3Block {
            cn_next: read_u32(bytes, 4)?,
            conversion: read_u32(bytes, 8)?,
            channel_type: read_u16(bytes, 24)?,
            short_name: read_fixed_str(bytes, 26, 32)?,
            description: read_fixed_str(bytes, 58, 128)?,
            start_offset: read_u16(bytes, 186)?,
            bit_count: read_u16(bytes, 188)?,
            data_type: read_u16(bytes, 190)?,
            long_name,
            additional_byte_offset,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; CN3_BLOCK_LEN];
        buf[..2].copy_from_slice(b"CN");
        buf[2..4].copy_from_slice(&(CN3_BLOCK_LEN as u16).to_le_bytes());
        buf[4..8].copy_from_slice(&self.cn_next.to_le_bytes());
        buf[8..12].copy_from_slice(&self.conversion.to_le_bytes());
        buf[24..26].copy_from_slice(&self.channel_type.to_le_bytes());
        write_fixed_str(&mut buf[26..58], &self.short_name);
        write_fixed_str(&mut buf[58..186], &self.description);
        buf[186..188].copy_from_slice(&self.start_offset.to_le_bytes());
        buf[188..190].copy_from_slice(&self.bit_count.to_le_bytes());
        buf[190..192].copy_from_slice(&self.data_type.to_le_bytes());
        buf[218..222].copy_from_slice(&self.long_name.to_le_bytes());
        buf[226..228].copy_from_slice(&self.additional_byte_offset.to_le_bytes());
        buf
    }

    pub fn is_time_master(&self) -> bool {
        self.channel_type == CHANNEL_TYPE_MASTER3
    }

    /// Whole-byte position of the field inside the sample area.
    pub fn byte_offset(&self) -> u32 {
        self.additional_byte_offset as u32 + (self.start_offset as u32) / 8
    }

    pub fn bit_offset(&self) -> u8 {
        (self.start_offset % 8) as u8
    }

    /// Map the 3.x data-type code, which folds byte order into the code
    /// itself.
    pub fn model_data_type(&self) -> Option<DataType> {
        Some(match self.data_type {
            0 | 13 => DataType::UnsignedIntegerLE,
            9 => DataType::UnsignedIntegerBE,
            1 | 14 => DataType::SignedIntegerLE,
            10 => DataType::SignedIntegerBE,
            2 | 3 | 15 | 16 => DataType::FloatLE,
            11 | 12 => DataType::FloatBE,
            7 => DataType::StringLatin1,
            8 => DataType::ByteArray,
            _ => return None,
        })
    }

    pub fn data_type_code(data_type: DataType, bit_count: u32) -> u16 {
        match data_type {
            DataType::UnsignedIntegerLE => 0,
            DataType::UnsignedIntegerBE => 9,
            DataType::SignedIntegerLE => 1,
            DataType::SignedIntegerBE => 10,
            DataType::FloatLE => {
                if bit_count == 32 {
                    2
                } else {
                    3
                }
            }
            DataType::FloatBE => {
                if bit_count == 32 {
                    11
                } else {
                    12
                }
            }
            // The 3.x layout has a single string type; UTF-8 bytes pass
            // through it unchanged.
            DataType::StringLatin1 | DataType::StringUtf8 => 7,
            DataType::ByteArray => 8,
        }
    }
}

/// `CC`: 3.x conversion, carrying the unit text inline.
#[derive(Debug, Clone)]
pub(crate) struct Cc3Block {
    pub cc_type: u16,
    pub unit: Option<String>,
    pub params: Vec<f64>,
    pub formula: Option<String>,
}

impl Cc3Block {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_id(bytes, "CC", 46)?;
        let block_len = read_u16(bytes, 2)? as usize;
        let unit = read_fixed_str(bytes, 22, 20)?;
        let cc_type = read_u16(bytes, 42)?;
        let param_count = read_u16(bytes, 44)? as usize;
        let (params, formula) = if cc_type == CC3_TYPE_FORMULA {
            validate_buffer_size(bytes, block_len, file!(), line!())?;
            let text = read_fixed_str(bytes, 46, block_len - 46)?;
            (Vec::new(), Some(text))
        } else {
            let pairs = if cc_type == CC3_TYPE_TAB_INTERP || cc_type == CC3_TYPE_TAB {
                param_count * 2
            } else {
                param_count
            };
            let mut params = Vec::with_capacity(pairs);
            for i in 0..pairs {
                params.push(read_f64(bytes, 46 + i * 8)?);
            }
            (params, None)
        };
        Ok(Cc3Block {
            cc_type,
            unit: if unit.is_empty() { None } else { Some(unit) },
            params,
            formula,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let (body_len, param_count) = match self.cc_type {
            CC3_TYPE_FORMULA => {
                let text = self.formula.as_deref().unwrap_or("");
                (text.len() + 1, 1usize)
            }
            CC3_TYPE_TAB_INTERP | CC3_TYPE_TAB => {
                (self.params.len() * 8, self.params.len() / 2)
            }
            _ => (self.params.len() * 8, self.params.len()),
        };
        let block_len = 46 + body_len;
        if block_len > u16::MAX as usize {
            return Err(Error::Serialization(format!(
                "conversion block of {block_len} bytes exceeds the 3.x size field"
            )));
        }
        let mut buf = vec![0u8; block_len];
        buf[..2].copy_from_slice(b"CC");
        buf[2..4].copy_from_slice(&(block_len as u16).to_le_bytes());
        write_fixed_str(&mut buf[22..42], self.unit.as_deref().unwrap_or(""));
        buf[42..44].copy_from_slice(&self.cc_type.to_le_bytes());
        buf[44..46].copy_from_slice(&(param_count as u16).to_le_bytes());
        match self.cc_type {
            CC3_TYPE_FORMULA => {
                if let Some(text) = &self.formula {
                    write_fixed_str(&mut buf[46..], text);
                }
            }
            _ => {
                for (i, p) in self.params.iter().enumerate() {
                    buf[46 + i * 8..54 + i * 8].copy_from_slice(&p.to_le_bytes());
                }
            }
        }
        Ok(buf)
    }

    pub fn from_model(conversion: &Conversion, unit: Option<&str>) -> Result<Self> {
        let (cc_type, params, formula) = match conversion {
            Conversion::Identity => (CC3_TYPE_IDENTITY, Vec::new(), None),
            Conversion::Linear { scale, offset } => {
                (CC3_TYPE_LINEAR, vec![*offset, *scale], None)
            }
            Conversion::Rational {
                numerator,
                denominator,
            } => {
                let mut params = numerator.to_vec();
                params.extend_from_slice(denominator);
                (CC3_TYPE_RATIONAL, params, None)
            }
            Conversion::Tabular { pairs, interpolate } => {
                let mut params = Vec::with_capacity(pairs.len() * 2);
                for (k, v) in pairs {
                    params.push(*k);
                    params.push(*v);
                }
                let cc_type = if *interpolate {
                    CC3_TYPE_TAB_INTERP
                } else {
                    CC3_TYPE_TAB
                };
                (cc_type, params, None)
            }
            Conversion::Formula { expression } => {
                (CC3_TYPE_FORMULA, Vec::new(), Some(expression.clone()))
            }
            Conversion::Lookup { .. } => {
                return Err(Error::LossyConversion {
                    reason: "exact-match lookup tables have no 3.x representation".into(),
                });
            }
        };
        Ok(Cc3Block {
            cc_type,
            unit: unit.map(str::to_string),
            params,
            formula,
        })
    }

    pub fn to_model(&self) -> Result<Conversion> {
        let conv = match self.cc_type {
            CC3_TYPE_IDENTITY => Conversion::Identity,
            CC3_TYPE_LINEAR => {
                if self.params.len() < 2 {
                    return Err(Error::InvalidConversion {
                        reason: "linear conversion needs two parameters".into(),
                    });
                }
                Conversion::Linear {
                    offset: self.params[0],
                    scale: self.params[1],
                }
            }
            CC3_TYPE_TAB_INTERP | CC3_TYPE_TAB => Conversion::Tabular {
                pairs: self.params.chunks_exact(2).map(|p| (p[0], p[1])).collect(),
                interpolate: self.cc_type == CC3_TYPE_TAB_INTERP,
            },
            CC3_TYPE_RATIONAL => {
                if self.params.len() < 6 {
                    return Err(Error::InvalidConversion {
                        reason: "rational conversion needs six parameters".into(),
                    });
                }
                Conversion::Rational {
                    numerator: [self.params[0], self.params[1], self.params[2]],
                    denominator: [self.params[3], self.params[4], self.params[5]],
                }
            }
            CC3_TYPE_FORMULA => Conversion::Formula {
                expression: self.formula.clone().unwrap_or_default(),
            },
            other => {
                return Err(Error::InvalidConversion {
                    reason: format!("conversion type {other} not supported"),
                });
            }
        };
        Ok(conv.normalized())
    }
}

/// `TX`: NUL-terminated text.
#[derive(Debug, Clone)]
pub(crate) struct Tx3Block {
    pub text: String,
}

impl Tx3Block {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_id(bytes, "TX", 4)?;
        let block_len = read_u16(bytes, 2)? as usize;
        validate_buffer_size(bytes, block_len, file!(), line!())?;
        Ok(Tx3Block {
            text: read_fixed_str(bytes, 4, block_len - 4)?,
        })
    }

    pub fn to_bytes(text: &str) -> Result<Vec<u8>> {
        let block_len = 4 + text.len() + 1;
        if block_len > u16::MAX as usize {
            return Err(Error::Serialization(format!(
                "text of {} bytes exceeds the 3.x size field",
                text.len()
            )));
        }
        let mut buf = vec![0u8; block_len];
        buf[..2].copy_from_slice(b"TX");
        buf[2..4].copy_from_slice(&(block_len as u16).to_le_bytes());
        write_fixed_str(&mut buf[4..], text);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_round_trip() {
        let cn = Cn3Block {
            cn_next: 0x100,
            conversion: 0x200,
            channel_type: CHANNEL_TYPE_MASTER3,
            short_name: "t".into(),
            description: "time axis".into(),
            start_offset: 5,
            bit_count: 64,
            data_type: 3,
            long_name: 0,
            additional_byte_offset: 8,
        };
        let back = Cn3Block::from_bytes(&cn.to_bytes()).unwrap();
        assert!(back.is_time_master());
        assert_eq!(back.short_name, "t");
        assert_eq!(back.byte_offset(), 8);
        assert_eq!(back.bit_offset(), 5);
        assert_eq!(back.model_data_type(), Some(DataType::FloatLE));
    }

    #[test]
    fn conversion_round_trips() {
        for conv in [
            Conversion::Linear {
                scale: 2.0,
                offset: 1.0,
            },
            Conversion::Rational {
                numerator: [0.0, 4.0, -0.5],
                denominator: [0.0, 0.0, 1.0],
            },
            Conversion::Tabular {
                pairs: vec![(0.0, 1.0), (2.0, 3.0)],
                interpolate: true,
            },
            Conversion::Formula {
                expression: "3 * sin(X)".into(),
            },
        ] {
            let cc = Cc3Block::from_model(&conv, Some("rpm")).unwrap();
            let back = Cc3Block::from_bytes(&cc.to_bytes().unwrap()).unwrap();
            assert_eq!(back.to_model().unwrap(), conv);
            assert_eq!(back.unit.as_deref(), Some("rpm"));
        }
    }

    #[test]
    fn lookup_has_no_v3_form() {
        let conv = Conversion::Lookup {
            pairs: vec![(0.0, 1.0)],
            default: 0.0,
        };
        assert!(matches!(
            Cc3Block::from_model(&conv, None),
            Err(Error::LossyConversion { .. })
        ));
    }

    #[test]
    fn text_round_trip() {
        let bytes = Tx3Block::to_bytes("a_rather_long_channel_name_beyond_31_chars").unwrap();
        let back = Tx3Block::from_bytes(&bytes).unwrap();
        assert_eq!(back.text, "a_rather_long_channel_name_beyond_31_chars");
    }

    #[test]
    fn header_keeps_nanosecond_time() {
        let hd = Hd3Block {
            dg_first: 0x300,
            comment: 0,
            abs_time_ns: 42_000_000_000,
        };
        let back = Hd3Block::from_bytes(&hd.to_bytes(2)).unwrap();
        assert_eq!(back.dg_first, 0x300);
        assert_eq!(back.abs_time_ns, 42_000_000_000);
    }
}
