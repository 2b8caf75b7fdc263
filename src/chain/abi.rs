use sha3::{Digest, Keccak256};

use super::Address;

pub const WORD: usize = 32;

/// Selector of the `Error(string)` revert payload.
const ERROR_STRING: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

#[derive(Debug)]
pub enum AbiError {
    Truncated { offset: usize, len: usize },
    Overflow { offset: usize },
    InvalidBool { offset: usize },
    Utf8(std::string::FromUtf8Error),
}

impl std::fmt::Display for AbiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { offset, len } => {
                write!(f, "return data too short: wanted {len} bytes at {offset}")
            }
            Self::Overflow { offset } => write!(f, "integer at {offset} does not fit"),
            Self::InvalidBool { offset } => write!(f, "word at {offset} is not a bool"),
            Self::Utf8(e) => e.fmt(f),
        }
    }
}
impl std::error::Error for AbiError {}

/// Argument of a contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Uint(u128),
    Address(Address),
    String(String),
}

pub fn keccak(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend(encode(tokens));
    out
}

pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token {
            Token::Uint(v) => head.extend(uint_word(*v)),
            Token::Address(a) => {
                let mut word = [0u8; WORD];
                word[12..].copy_from_slice(a.as_bytes());
                head.extend(word);
            }
            Token::String(s) => {
                head.extend(uint_word((head_len + tail.len()) as u128));
                tail.extend(uint_word(s.len() as u128));
                tail.extend(s.as_bytes());
                let pad = (WORD - s.len() % WORD) % WORD;
                tail.extend(std::iter::repeat(0).take(pad));
            }
        }
    }

    head.extend(tail);
    head
}

fn uint_word(v: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&v.to_be_bytes());
    word
}

/// Reads return values by head index.
pub struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], AbiError> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or(AbiError::Truncated { offset, len })
    }

    fn uint_at(&self, offset: usize) -> Result<u128, AbiError> {
        let word = self.slice(offset, WORD)?;
        if word[..16].iter().any(|b| *b != 0) {
            return Err(AbiError::Overflow { offset });
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&word[16..]);

        Ok(u128::from_be_bytes(low))
    }

    fn usize_at(&self, offset: usize) -> Result<usize, AbiError> {
        usize::try_from(self.uint_at(offset)?).map_err(|_| AbiError::Overflow { offset })
    }

    pub fn uint(&self, index: usize) -> Result<u128, AbiError> {
        self.uint_at(index * WORD)
    }

    pub fn u64(&self, index: usize) -> Result<u64, AbiError> {
        let offset = index * WORD;
        u64::try_from(self.uint_at(offset)?).map_err(|_| AbiError::Overflow { offset })
    }

    pub fn bool(&self, index: usize) -> Result<bool, AbiError> {
        match self.uint(index)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(AbiError::InvalidBool {
                offset: index * WORD,
            }),
        }
    }

    pub fn address(&self, index: usize) -> Result<Address, AbiError> {
        let word = self.slice(index * WORD, WORD)?;
        let mut raw = [0u8; 20];
        raw.copy_from_slice(&word[12..]);

        Ok(Address::new(raw))
    }

    pub fn string(&self, index: usize) -> Result<String, AbiError> {
        let offset = self.usize_at(index * WORD)?;
        let len = self.usize_at(offset)?;
        let bytes = self.slice(offset + WORD, len)?;

        String::from_utf8(bytes.to_vec()).map_err(AbiError::Utf8)
    }

    pub fn u64_array(&self, index: usize) -> Result<Vec<u64>, AbiError> {
        let offset = self.usize_at(index * WORD)?;
        let len = self.usize_at(offset)?;
        let body = len
            .checked_mul(WORD)
            .ok_or(AbiError::Overflow { offset })?;
        self.slice(offset + WORD, body)?;

        (0..len)
            .map(|i| {
                let at = offset + WORD * (i + 1);
                u64::try_from(self.uint_at(at)?).map_err(|_| AbiError::Overflow { offset: at })
            })
            .collect()
    }
}

/// Extracts the message of an `Error(string)` revert, if that is what `data` holds.
pub fn revert_reason(data: &[u8]) -> Option<String> {
    let body = data.strip_prefix(&ERROR_STRING[..])?;
    Decoder::new(body).string(0).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_match_known_values() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(selector("Error(string)"), ERROR_STRING);
    }

    #[test]
    fn strings_go_to_the_tail() {
        let data = encode(&[Token::Uint(7), Token::String("hi".into())]);

        assert_eq!(data.len(), 4 * WORD);
        let dec = Decoder::new(&data);
        assert_eq!(dec.u64(0).unwrap(), 7);
        assert_eq!(dec.uint(1).unwrap(), 2 * WORD as u128);
        assert_eq!(dec.string(1).unwrap(), "hi");
        assert!(data[3 * WORD + 2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn empty_string_has_no_body() {
        let data = encode(&[Token::String(String::new())]);

        assert_eq!(data.len(), 2 * WORD);
        assert_eq!(Decoder::new(&data).string(0).unwrap(), "");
    }

    #[test]
    fn truncated_data_is_rejected() {
        let data = encode(&[Token::String("truncate me".into())]);
        let short = &data[..data.len() - WORD];

        assert!(matches!(
            Decoder::new(short).string(0),
            Err(AbiError::Truncated { .. })
        ));
        assert!(matches!(
            Decoder::new(&[]).u64(0),
            Err(AbiError::Truncated { .. })
        ));
    }

    #[test]
    fn oversized_integers_are_rejected() {
        let mut word = [0u8; WORD];
        word[0] = 1;
        assert!(matches!(
            Decoder::new(&word).uint(0),
            Err(AbiError::Overflow { .. })
        ));

        let data = encode(&[Token::Uint(u128::from(u64::MAX) + 1)]);
        assert!(matches!(
            Decoder::new(&data).u64(0),
            Err(AbiError::Overflow { .. })
        ));
    }

    #[test]
    fn array_length_must_fit_the_data() {
        let data = encode(&[Token::Uint(WORD as u128), Token::Uint(u128::from(u32::MAX))]);

        assert!(matches!(
            Decoder::new(&data).u64_array(0),
            Err(AbiError::Truncated { .. })
        ));
    }

    #[test]
    fn bools_must_be_zero_or_one() {
        let data = encode(&[Token::Uint(1), Token::Uint(2)]);
        let dec = Decoder::new(&data);

        assert!(dec.bool(0).unwrap());
        assert!(matches!(dec.bool(1), Err(AbiError::InvalidBool { .. })));
    }

    #[test]
    fn addresses_survive_padding() {
        let addr: Address = "0x00000000000000000000000000000000000000ff".parse().unwrap();
        let data = encode(&[Token::Address(addr)]);

        assert_eq!(Decoder::new(&data).address(0).unwrap(), addr);
    }

    #[test]
    fn dynamic_arrays_decode() {
        // offset, length, then three elements
        let mut data = Vec::new();
        for v in [32u128, 3, 1, 5, 9] {
            data.extend(uint_word(v));
        }

        assert_eq!(Decoder::new(&data).u64_array(0).unwrap(), vec![1, 5, 9]);
    }

    #[test]
    fn revert_reason_is_decoded() {
        let mut data = ERROR_STRING.to_vec();
        data.extend(encode(&[Token::String("Post does not exist".into())]));

        assert_eq!(revert_reason(&data).as_deref(), Some("Post does not exist"));
        assert_eq!(revert_reason(&[0xde, 0xad]), None);
    }
}
