use crate::{
    Error, Result,
    blocks::common::{read_f64, read_u8, read_u16, read_u64, validate_buffer_size},
    blocks::v4::{BlockHeader, BlockParse},
    conversion::Conversion,
};

pub(crate) const CC_TYPE_IDENTITY: u8 = 0;
pub(crate) const CC_TYPE_LINEAR: u8 = 1;
pub(crate) const CC_TYPE_RATIONAL: u8 = 2;
pub(crate) const CC_TYPE_ALGEBRAIC: u8 = 3;
pub(crate) const CC_TYPE_TAB_INTERP: u8 = 4;
pub(crate) const CC_TYPE_TAB: u8 = 5;
pub(crate) const CC_TYPE_RANGE_LOOKUP: u8 = 6;

/// `##CC`: conversion rule. Four fixed links (name, unit, comment,
/// inverse) followed by `ref_count` reference links, then the scalar
/// parameter table.
#[derive(Debug, Clone)]
pub(crate) struct ConversionBlock {
    pub header: BlockHeader,
    pub refs: Vec<u64>,
    pub cc_type: u8,
    pub values: Vec<f64>,
}

impl BlockParse for ConversionBlock {
    const ID: &'static str = "##CC";

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Self::parse_header(bytes)?;
        let links_nr = header.links_nr as usize;
        if links_nr < 4 {
            return Err(Error::CorruptBlock {
                offset: 0,
                reason: format!("conversion block with {links_nr} links"),
            });
        }
        let data_base = 24 + links_nr * 8;
        validate_buffer_size(bytes, data_base + 24, file!(), line!())?;
        let mut refs = Vec::with_capacity(links_nr - 4);
        for i in 4..links_nr {
            refs.push(read_u64(bytes, 24 + i * 8)?);
        }
        let cc_type = read_u8(bytes, data_base)?;
        let val_count = read_u16(bytes, data_base + 6)? as usize;
        validate_buffer_size(bytes, data_base + 24 + val_count * 8, file!(), line!())?;
        let mut values = Vec::with_capacity(val_count);
        for i in 0..val_count {
            values.push(read_f64(bytes, data_base + 24 + i * 8)?);
        }
        Ok(ConversionBlock {
            header,
            refs,
            cc_type,
            values,
        })
    }
}

impl ConversionBlock {
    fn new(cc_type: u8, refs: Vec<u64>, values: Vec<f64>) -> Self {
        let links_nr = 4 + refs.len() as u64;
        let block_len = 24 + links_nr * 8 + 24 + values.len() as u64 * 8;
        ConversionBlock {
            header: BlockHeader::new("##CC", block_len, links_nr),
            refs,
            cc_type,
            values,
        }
    }

    /// Build the block form of a model conversion. `Formula` needs the
    /// address of an already written `##TX` holding the expression;
    /// `Identity` is represented by no block at all and is rejected here.
    pub fn from_model(conversion: &Conversion, formula_addr: u64) -> Result<Self> {
        Ok(match conversion {
            Conversion::Identity => {
                return Err(Error::Serialization(
                    "identity conversions are stored as a null link".into(),
                ));
            }
            Conversion::Linear { scale, offset } => {
                Self::new(CC_TYPE_LINEAR, Vec::new(), vec![*offset, *scale])
            }
            Conversion::Rational {
                numerator,
                denominator,
            } => {
                let mut values = numerator.to_vec();
                values.extend_from_slice(denominator);
                Self::new(CC_TYPE_RATIONAL, Vec::new(), values)
            }
            Conversion::Tabular { pairs, interpolate } => {
                let mut values = Vec::with_capacity(pairs.len() * 2);
                for (k, v) in pairs {
                    values.push(*k);
                    values.push(*v);
                }
                let cc_type = if *interpolate {
                    CC_TYPE_TAB_INTERP
                } else {
                    CC_TYPE_TAB
                };
                Self::new(cc_type, Vec::new(), values)
            }
            Conversion::Formula { .. } => {
                Self::new(CC_TYPE_ALGEBRAIC, vec![formula_addr], Vec::new())
            }
            Conversion::Lookup { pairs, default } => {
                // Exact matches become degenerate ranges, default last.
                let mut values = Vec::with_capacity(pairs.len() * 3 + 1);
                for (k, v) in pairs {
                    values.push(*k);
                    values.push(*k);
                    values.push(*v);
                }
                values.push(*default);
                Self::new(CC_TYPE_RANGE_LOOKUP, Vec::new(), values)
            }
        })
    }

    /// Map back onto the model. `formula_text` is the resolved text of
    /// `refs[0]` for algebraic blocks.
    pub fn to_model(&self, formula_text: Option<String>) -> Result<Conversion> {
        let conv = match self.cc_type {
            CC_TYPE_IDENTITY => Conversion::Identity,
            CC_TYPE_LINEAR => {
                if self.values.len() < 2 {
                    return Err(invalid("linear conversion needs two parameters"));
                }
                Conversion::Linear {
                    offset: self.values[0],
                    scale: self.values[1],
                }
            }
            CC_TYPE_RATIONAL => {
                if self.values.len() < 6 {
                    return Err(invalid("rational conversion needs six parameters"));
                }
                Conversion::Rational {
                    numerator: [self.values[0], self.values[1], self.values[2]],
                    denominator: [self.values[3], self.values[4], self.values[5]],
                }
            }
            CC_TYPE_ALGEBRAIC => Conversion::Formula {
                expression: formula_text
                    .ok_or_else(|| invalid("algebraic conversion without formula text"))?,
            },
            CC_TYPE_TAB_INTERP | CC_TYPE_TAB => {
                let pairs = self
                    .values
                    .chunks_exact(2)
                    .map(|p| (p[0], p[1]))
                    .collect();
                Conversion::Tabular {
                    pairs,
                    interpolate: self.cc_type == CC_TYPE_TAB_INTERP,
                }
            }
            CC_TYPE_RANGE_LOOKUP => {
                if self.values.len() % 3 != 1 {
                    return Err(invalid("range lookup needs 3n+1 parameters"));
                }
                let default = self.values[self.values.len() - 1];
                let mut pairs = Vec::with_capacity(self.values.len() / 3);
                for t in self.values[..self.values.len() - 1].chunks_exact(3) {
                    if t[0] != t[1] {
                        // Only exact-match tables are modeled; a real
                        // range table has no lossless representation
                        // here.
                        return Err(invalid("non-degenerate range lookup"));
                    }
                    pairs.push((t[0], t[2]));
                }
                Conversion::Lookup { pairs, default }
            }
            other => {
                return Err(invalid(&format!("conversion type {other} not supported")));
            }
        };
        Ok(conv.normalized())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.header.block_len as usize);
        buf.extend_from_slice(&self.header.to_bytes()?);
        // Name, unit, comment and inverse links stay null.
        buf.extend_from_slice(&[0u8; 32]);
        for r in &self.refs {
            buf.extend_from_slice(&r.to_le_bytes());
        }
        buf.push(self.cc_type);
        buf.push(0); // precision
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&(self.refs.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(self.values.len() as u16).to_le_bytes());
        buf.extend_from_slice(&0f64.to_le_bytes()); // phys range min
        buf.extend_from_slice(&0f64.to_le_bytes()); // phys range max
        for v in &self.values {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        debug_assert_eq!(buf.len() as u64, self.header.block_len);
        Ok(buf)
    }
}

fn invalid(reason: &str) -> Error {
    Error::InvalidConversion {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(conv: &Conversion) -> Conversion {
        let block = ConversionBlock::from_model(conv, 0).unwrap();
        let back = ConversionBlock::from_bytes(&block.to_bytes().unwrap()).unwrap();
        back.to_model(match conv {
            Conversion::Formula { expression } => Some(expression.clone()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn linear_round_trip() {
        let conv = Conversion::Linear {
            scale: 3.0,
            offset: -0.5,
        };
        assert_eq!(round_trip(&conv), conv);
    }

    #[test]
    fn rational_round_trip() {
        let conv = Conversion::Rational {
            numerator: [0.0, 4.0, -0.5],
            denominator: [0.0, 0.0, 1.0],
        };
        assert_eq!(round_trip(&conv), conv);
    }

    #[test]
    fn lookup_round_trip() {
        let conv = Conversion::Lookup {
            pairs: vec![(0.0, 10.0), (1.0, 20.0)],
            default: -1.0,
        };
        assert_eq!(round_trip(&conv), conv);
    }

    #[test]
    fn tabular_round_trip() {
        for interpolate in [false, true] {
            let conv = Conversion::Tabular {
                pairs: vec![(0.0, 0.0), (5.0, 50.0)],
                interpolate,
            };
            assert_eq!(round_trip(&conv), conv);
        }
    }

    #[test]
    fn real_range_table_is_rejected() {
        let block = ConversionBlock::new(
            CC_TYPE_RANGE_LOOKUP,
            Vec::new(),
            vec![0.0, 10.0, 1.0, 99.0],
        );
        assert!(matches!(
            block.to_model(None),
            Err(Error::InvalidConversion { .. })
        ));
    }
}
