use std::fmt;

use ftx_core::{
    charset_index, pack_field, unpack_field, Payload, CHARSET_ALNUM, CHARSET_ALNUM_SPACE,
    CHARSET_DIGIT, CHARSET_FREETEXT, CHARSET_HASH, CHARSET_LETTER_SPACE, MAX22, MAXGRID4, NTOKENS,
};
use ftx_hash::{CallsignStore, HashWidth};
use thiserror::Error;

/// Free-text messages carry at most this many characters.
pub const MAX_TEXT_CHARS: usize = 13;

const TELEMETRY_BYTES: usize = 9;
const CQ_LETTER_BASE: u32 = 1003;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("invalid callsign")]
    InvalidCallsign,
    #[error("invalid locator")]
    InvalidLocator,
    #[error("invalid character")]
    InvalidCharacter,
    #[error("message too long")]
    MessageTooLong,
    #[error("report out of range")]
    InvalidReport,
    #[error("unsupported message type")]
    UnsupportedType,
}

/// Third field of a standard exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    None,
    /// Four-character locator, with `ack` for the `R ` prefix form.
    Grid { locator: String, ack: bool },
    /// Signal report in dB, with `ack` for the `R` prefix form.
    Report { db: i8, ack: bool },
    Rrr,
    Rr73,
    /// The bare `73` sign-off.
    Signoff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Standard {
        call_to: String,
        call_de: String,
        exchange: Exchange,
    },
    FreeText {
        text: String,
    },
    /// 71-bit opaque value, MSB-first in nine bytes with the top bit clear.
    Telemetry {
        data: [u8; TELEMETRY_BYTES],
    },
    /// Message types with no packing routine here; the raw payload is kept so
    /// nothing is lost on re-encode by other tooling.
    NonStandard {
        i3: u8,
        n3: u8,
        payload: Payload,
    },
    Invalid,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Grid { locator, ack } => {
                if *ack {
                    write!(f, "R {locator}")
                } else {
                    write!(f, "{locator}")
                }
            }
            Self::Report { db, ack } => {
                let sign = if *db < 0 { '-' } else { '+' };
                if *ack {
                    write!(f, "R{sign}{:02}", db.abs())
                } else {
                    write!(f, "{sign}{:02}", db.abs())
                }
            }
            Self::Rrr => write!(f, "RRR"),
            Self::Rr73 => write!(f, "RR73"),
            Self::Signoff => write!(f, "73"),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard {
                call_to,
                call_de,
                exchange,
            } => {
                write!(f, "{call_to} {call_de}")?;
                if !matches!(exchange, Exchange::None) {
                    write!(f, " {exchange}")?;
                }
                Ok(())
            }
            Self::FreeText { text } => write!(f, "{text}"),
            Self::Telemetry { data } => {
                for byte in data {
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            }
            Self::NonStandard { i3, n3, .. } => write!(f, "<type {i3}.{n3}>"),
            Self::Invalid => write!(f, "<invalid>"),
        }
    }
}

/// Uppercase and collapse runs of whitespace, as transmitted text is compared.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase()
}

// ---------------------------------------------------------------------------
// Callsign classification

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suffix {
    None,
    Rover,
    Portable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CallForm {
    /// DE, QRZ, CQ and the CQ sub-forms; never suffixed.
    Token(String),
    /// A call that aligns into the six-character buffer.
    Base(String, Suffix),
    /// Anything else that the 22-bit hash can carry.
    Hashed(String),
}

fn is_cq_modifier(token: &str) -> bool {
    let b = token.as_bytes();
    (b.len() == 3 && b.iter().all(u8::is_ascii_digit))
        || (!b.is_empty() && b.len() <= 4 && b.iter().all(u8::is_ascii_uppercase))
}

/// Map a call into the aligned six-character buffer, applying the two country
/// prefix contractions. The third position must hold the call-area digit.
fn basecall_c6(base: &str) -> Option<[u8; 6]> {
    let contracted: String;
    let call = if base.starts_with("3DA0") && (5..=7).contains(&base.len()) {
        contracted = format!("3D0{}", &base[4..]);
        contracted.as_str()
    } else if base.starts_with("3X")
        && base.len() >= 3
        && base.as_bytes()[2].is_ascii_uppercase()
        && base.len() <= 7
    {
        contracted = format!("Q{}", &base[2..]);
        contracted.as_str()
    } else {
        base
    };

    let b = call.as_bytes();
    let n = b.len();
    let mut c6 = [b' '; 6];
    if (3..=6).contains(&n) && b[2].is_ascii_digit() {
        c6[..n].copy_from_slice(b);
    } else if (2..=5).contains(&n) && b[1].is_ascii_digit() {
        c6[1..=n].copy_from_slice(b);
    } else {
        return None;
    }

    charset_index(CHARSET_ALNUM_SPACE, c6[0])?;
    charset_index(CHARSET_ALNUM, c6[1])?;
    charset_index(CHARSET_DIGIT, c6[2])?;
    for &c in &c6[3..] {
        charset_index(CHARSET_LETTER_SPACE, c)?;
    }
    // A bare number such as a report is never a callsign.
    if !c6.iter().any(u8::is_ascii_uppercase) {
        return None;
    }
    Some(c6)
}

/// A call the hash can carry: 3 to 11 base-38 characters including a letter,
/// and enough structure (digit or slash) to not be a bare word.
fn is_hashable(call: &str) -> bool {
    let b = call.as_bytes();
    (3..=11).contains(&b.len())
        && b.iter().all(|&c| c != b' ' && charset_index(CHARSET_HASH, c).is_some())
        && b.iter().any(u8::is_ascii_uppercase)
        && b.iter().any(|&c| c.is_ascii_digit() || c == b'/')
}

fn classify_call(token: &str) -> Option<CallForm> {
    match token {
        "CQ" | "DE" | "QRZ" => return Some(CallForm::Token(token.to_owned())),
        _ => {}
    }
    if let Some(rest) = token.strip_prefix("CQ ") {
        if rest.as_bytes().len() == 3 && rest.bytes().all(|c| c.is_ascii_digit()) {
            return Some(CallForm::Token(token.to_owned()));
        }
        if is_cq_modifier(rest) && rest.bytes().all(|c| c.is_ascii_uppercase()) {
            return Some(CallForm::Token(token.to_owned()));
        }
        return None;
    }
    if let Some(inner) = token.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
        if is_hashable(inner) || basecall_c6(inner).is_some() {
            return Some(CallForm::Hashed(inner.to_owned()));
        }
        return None;
    }

    let (base, suffix) = if let Some(base) = token.strip_suffix("/R") {
        (base, Suffix::Rover)
    } else if let Some(base) = token.strip_suffix("/P") {
        (base, Suffix::Portable)
    } else {
        (token, Suffix::None)
    };

    if basecall_c6(base).is_some() {
        return Some(CallForm::Base(base.to_owned(), suffix));
    }
    if suffix == Suffix::None && is_hashable(token) {
        return Some(CallForm::Hashed(token.to_owned()));
    }
    None
}

fn suffix_of(form: &CallForm) -> Suffix {
    match form {
        CallForm::Base(_, suffix) => *suffix,
        _ => Suffix::None,
    }
}

// ---------------------------------------------------------------------------
// Parsing

fn parse_exchange(tokens: &[&str]) -> Option<Exchange> {
    match tokens {
        [] => Some(Exchange::None),
        ["RRR"] => Some(Exchange::Rrr),
        ["RR73"] => Some(Exchange::Rr73),
        ["73"] => Some(Exchange::Signoff),
        ["R", grid] => parse_grid(grid, true),
        [one] => parse_grid(one, false).or_else(|| parse_report(one)),
        _ => None,
    }
}

fn parse_grid(token: &str, ack: bool) -> Option<Exchange> {
    let b = token.as_bytes();
    let four_ok = |b: &[u8]| {
        (b'A'..=b'R').contains(&b[0])
            && (b'A'..=b'R').contains(&b[1])
            && b[2].is_ascii_digit()
            && b[3].is_ascii_digit()
    };
    match b.len() {
        4 if four_ok(b) => Some(Exchange::Grid {
            locator: token.to_owned(),
            ack,
        }),
        // Extended locators are accepted but only the square survives packing.
        6 if four_ok(b)
            && (b'A'..=b'X').contains(&b[4].to_ascii_uppercase())
            && (b'A'..=b'X').contains(&b[5].to_ascii_uppercase()) =>
        {
            Some(Exchange::Grid {
                locator: token[..4].to_owned(),
                ack,
            })
        }
        _ => None,
    }
}

fn parse_report(token: &str) -> Option<Exchange> {
    let (body, ack) = match token.strip_prefix('R') {
        Some(rest) => (rest, true),
        None => (token, false),
    };
    let b = body.as_bytes();
    if b.len() != 3 || (b[0] != b'+' && b[0] != b'-') || !b[1].is_ascii_digit() || !b[2].is_ascii_digit()
    {
        return None;
    }
    let mut db = i8::try_from((b[1] - b'0') * 10 + (b[2] - b'0')).ok()?;
    if b[0] == b'-' {
        db = -db;
    }
    if !(-30..=30).contains(&db) {
        return None;
    }
    Some(Exchange::Report { db, ack })
}

fn parse_standard(text: &str) -> Option<Message> {
    let tokens: Vec<&str> = text.split(' ').collect();
    if tokens.len() < 2 {
        return None;
    }

    // CQ sub-forms consume two raw tokens as one pseudo-callsign.
    let (call_to_text, rest): (String, &[&str]) =
        if tokens[0] == "CQ" && tokens.len() >= 3 && is_cq_modifier(tokens[1]) {
            (format!("CQ {}", tokens[1]), &tokens[2..])
        } else {
            (tokens[0].to_owned(), &tokens[1..])
        };

    let to_form = classify_call(&call_to_text)?;
    let call_de = *rest.first()?;
    let de_form = classify_call(call_de)?;
    if matches!(de_form, CallForm::Token(_)) {
        return None;
    }
    let exchange = parse_exchange(&rest[1..])?;

    // One 77-bit layout covers both suffix interpretations; they cannot mix.
    if matches!(
        (suffix_of(&to_form), suffix_of(&de_form)),
        (Suffix::Rover, Suffix::Portable) | (Suffix::Portable, Suffix::Rover)
    ) {
        return None;
    }

    Some(Message::Standard {
        call_to: call_to_text,
        call_de: call_de.to_owned(),
        exchange,
    })
}

fn parse_telemetry(text: &str) -> Option<Message> {
    let b = text.as_bytes();
    if b.len() != 2 * TELEMETRY_BYTES || !b.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    // 18 hex digits are 72 bits; the value must fit in 71.
    if !b[0].is_ascii_digit() || b[0] > b'7' {
        return None;
    }
    let mut data = [0u8; TELEMETRY_BYTES];
    for (i, slot) in data.iter_mut().enumerate() {
        let hi = hex_val(b[2 * i]);
        let lo = hex_val(b[2 * i + 1]);
        *slot = (hi << 4) | lo;
    }
    Some(Message::Telemetry { data })
}

fn hex_val(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'A'..=b'F' => c - b'A' + 10,
        b'a'..=b'f' => c - b'a' + 10,
        _ => 0,
    }
}

/// Classify a textual message. The result is `Message::Invalid` when no
/// variant accepts the text; packing errors (overlong free text) surface from
/// [`pack`] instead.
#[must_use]
pub fn parse(text: &str) -> Message {
    let text = normalize(text);

    if let Some(msg) = parse_standard(&text) {
        return msg;
    }
    if let Some(msg) = parse_telemetry(&text) {
        return msg;
    }
    if text
        .bytes()
        .all(|c| charset_index(CHARSET_FREETEXT, c).is_some())
    {
        return Message::FreeText { text };
    }
    Message::Invalid
}

// ---------------------------------------------------------------------------
// 28-bit callsign field

fn pack_call(form: &CallForm, store: &dyn CallsignStore) -> Result<u32, MessageError> {
    match form {
        CallForm::Token(token) => match token.as_str() {
            "DE" => Ok(0),
            "QRZ" => Ok(1),
            "CQ" => Ok(2),
            _ => {
                let rest = token.strip_prefix("CQ ").ok_or(MessageError::InvalidCallsign)?;
                if rest.bytes().all(|c| c.is_ascii_digit()) {
                    let nnn: u32 = rest.parse().map_err(|_| MessageError::InvalidCallsign)?;
                    Ok(3 + nnn)
                } else {
                    let mut n = 0u32;
                    for c in rest.bytes() {
                        n = n * 27 + u32::from(c - b'A' + 1);
                    }
                    Ok(CQ_LETTER_BASE + n)
                }
            }
        },
        CallForm::Base(base, _) => {
            let c6 = basecall_c6(base).ok_or(MessageError::InvalidCallsign)?;
            let i0 = charset_index(CHARSET_ALNUM_SPACE, c6[0]).unwrap_or(0) as u32;
            let i1 = charset_index(CHARSET_ALNUM, c6[1]).unwrap_or(0) as u32;
            let i2 = charset_index(CHARSET_DIGIT, c6[2]).unwrap_or(0) as u32;
            let i3 = charset_index(CHARSET_LETTER_SPACE, c6[3]).unwrap_or(0) as u32;
            let i4 = charset_index(CHARSET_LETTER_SPACE, c6[4]).unwrap_or(0) as u32;
            let i5 = charset_index(CHARSET_LETTER_SPACE, c6[5]).unwrap_or(0) as u32;
            let n = ((((i0 * 36 + i1) * 10 + i2) * 27 + i3) * 27 + i4) * 27 + i5;
            store.save(base);
            Ok(NTOKENS + MAX22 + n)
        }
        CallForm::Hashed(call) => {
            if !is_hashable(call) && basecall_c6(call).is_none() {
                return Err(MessageError::InvalidCallsign);
            }
            let n22 = store.save(call);
            Ok(NTOKENS + n22)
        }
    }
}

fn unpack_call(n28: u32, store: &dyn CallsignStore) -> Result<String, MessageError> {
    match n28 {
        0 => return Ok("DE".to_owned()),
        1 => return Ok("QRZ".to_owned()),
        2 => return Ok("CQ".to_owned()),
        _ => {}
    }
    if n28 < CQ_LETTER_BASE {
        return Ok(format!("CQ {:03}", n28 - 3));
    }
    if n28 < NTOKENS {
        let mut n = n28 - CQ_LETTER_BASE;
        let mut letters = Vec::new();
        while n > 0 {
            let d = n % 27;
            if d == 0 {
                return Err(MessageError::InvalidCallsign);
            }
            letters.push(b'A' + (d as u8) - 1);
            n /= 27;
        }
        if letters.is_empty() || letters.len() > 4 {
            return Err(MessageError::InvalidCallsign);
        }
        letters.reverse();
        return Ok(format!("CQ {}", String::from_utf8(letters).expect("ascii")));
    }

    let n = n28 - NTOKENS;
    if n < MAX22 {
        return Ok(match store.lookup(HashWidth::H22, n) {
            Some(call) => format!("<{call}>"),
            None => "<...>".to_owned(),
        });
    }

    let mut n = n - MAX22;
    let i5 = n % 27;
    n /= 27;
    let i4 = n % 27;
    n /= 27;
    let i3 = n % 27;
    n /= 27;
    let i2 = n % 10;
    n /= 10;
    let i1 = n % 36;
    n /= 36;
    if n >= 37 {
        return Err(MessageError::InvalidCallsign);
    }
    let c6 = [
        CHARSET_ALNUM_SPACE[n as usize],
        CHARSET_ALNUM[i1 as usize],
        CHARSET_DIGIT[i2 as usize],
        CHARSET_LETTER_SPACE[i3 as usize],
        CHARSET_LETTER_SPACE[i4 as usize],
        CHARSET_LETTER_SPACE[i5 as usize],
    ];
    let call = String::from_utf8(c6.to_vec()).expect("ascii");
    let call = call.trim().to_owned();
    if call.is_empty() {
        return Err(MessageError::InvalidCallsign);
    }

    // Undo the country prefix contractions.
    let call = if let Some(rest) = call.strip_prefix("3D0") {
        if rest.is_empty() {
            call
        } else {
            format!("3DA0{rest}")
        }
    } else if call.len() >= 2
        && call.starts_with('Q')
        && call.as_bytes()[1].is_ascii_uppercase()
    {
        format!("3X{}", &call[1..])
    } else {
        call
    };

    store.save(&call);
    Ok(call)
}

// ---------------------------------------------------------------------------
// 16-bit exchange field

fn pack_exchange(exchange: &Exchange) -> Result<u16, MessageError> {
    let (ir, g15) = match exchange {
        Exchange::Grid { locator, ack } => {
            let b = locator.as_bytes();
            if b.len() != 4 {
                return Err(MessageError::InvalidLocator);
            }
            if !(b'A'..=b'R').contains(&b[0])
                || !(b'A'..=b'R').contains(&b[1])
                || !b[2].is_ascii_digit()
                || !b[3].is_ascii_digit()
            {
                return Err(MessageError::InvalidLocator);
            }
            let value = ((u16::from(b[0] - b'A') * 18 + u16::from(b[1] - b'A')) * 10
                + u16::from(b[2] - b'0'))
                * 10
                + u16::from(b[3] - b'0');
            (*ack, value)
        }
        Exchange::None => (false, MAXGRID4 + 1),
        Exchange::Rrr => (false, MAXGRID4 + 2),
        Exchange::Rr73 => (false, MAXGRID4 + 3),
        Exchange::Signoff => (false, MAXGRID4 + 4),
        Exchange::Report { db, ack } => {
            if !(-30..=30).contains(db) {
                return Err(MessageError::InvalidReport);
            }
            (*ack, MAXGRID4 + (35 + i16::from(*db)) as u16)
        }
    };
    Ok(u16::from(ir) << 15 | g15)
}

fn unpack_exchange(g16: u16) -> Result<Exchange, MessageError> {
    let ack = g16 & 0x8000 != 0;
    let mut v = g16 & 0x7FFF;
    if v <= MAXGRID4 {
        let d1 = (v % 10) as u8;
        v /= 10;
        let d0 = (v % 10) as u8;
        v /= 10;
        let c1 = (v % 18) as u8;
        v /= 18;
        if v >= 18 {
            return Err(MessageError::InvalidLocator);
        }
        let locator = String::from_utf8(vec![b'A' + v as u8, b'A' + c1, b'0' + d0, b'0' + d1])
            .expect("ascii");
        return Ok(Exchange::Grid { locator, ack });
    }
    match v - MAXGRID4 {
        1 => Ok(Exchange::None),
        2 => Ok(Exchange::Rrr),
        3 => Ok(Exchange::Rr73),
        4 => Ok(Exchange::Signoff),
        irpt @ 5..=65 => Ok(Exchange::Report {
            db: (irpt as i16 - 35) as i8,
            ack,
        }),
        _ => Err(MessageError::InvalidLocator),
    }
}

// ---------------------------------------------------------------------------
// 77-bit payload

fn pack_standard(
    call_to: &str,
    call_de: &str,
    exchange: &Exchange,
    store: &dyn CallsignStore,
) -> Result<Payload, MessageError> {
    let to_form = classify_call(call_to).ok_or(MessageError::InvalidCallsign)?;
    let de_form = classify_call(call_de).ok_or(MessageError::InvalidCallsign)?;

    let (sa, sb) = (suffix_of(&to_form), suffix_of(&de_form));
    let i3: u64 = match (sa, sb) {
        (Suffix::Rover, Suffix::Portable) | (Suffix::Portable, Suffix::Rover) => {
            return Err(MessageError::InvalidCallsign)
        }
        (Suffix::Portable, _) | (_, Suffix::Portable) => 2,
        _ => 1,
    };
    let ipa = u64::from(sa != Suffix::None);
    let ipb = u64::from(sb != Suffix::None);

    let n28a = u64::from(pack_call(&to_form, store)?);
    let n28b = u64::from(pack_call(&de_form, store)?);
    let g16 = u64::from(pack_exchange(exchange)?);

    let mut payload = Payload::default();
    pack_field(&mut payload, 0, 29, n28a << 1 | ipa);
    pack_field(&mut payload, 29, 29, n28b << 1 | ipb);
    pack_field(&mut payload, 58, 16, g16);
    pack_field(&mut payload, 74, 3, i3);
    Ok(payload)
}

fn pack_text(text: &str) -> Result<Payload, MessageError> {
    if text.len() > MAX_TEXT_CHARS {
        return Err(MessageError::MessageTooLong);
    }
    let mut value = 0u128;
    let mut chars = 0usize;
    for c in text.bytes() {
        let idx = charset_index(CHARSET_FREETEXT, c).ok_or(MessageError::InvalidCharacter)?;
        value = value * 42 + idx as u128;
        chars += 1;
    }
    for _ in chars..MAX_TEXT_CHARS {
        value *= 42;
    }
    Ok(pack_value71(value, 0))
}

fn pack_telemetry(data: &[u8; TELEMETRY_BYTES]) -> Result<Payload, MessageError> {
    if data[0] & 0x80 != 0 {
        return Err(MessageError::UnsupportedType);
    }
    let mut value = 0u128;
    for &b in data {
        value = value << 8 | u128::from(b);
    }
    Ok(pack_value71(value, 5))
}

/// Place a 71-bit value at payload bits 0..70, with `n3` at 71..73 and i3=0.
fn pack_value71(value: u128, n3: u64) -> Payload {
    let mut payload = Payload::default();
    for k in 0..71 {
        ftx_core::bit_set(&mut payload, k, (value >> (70 - k)) & 1 == 1);
    }
    pack_field(&mut payload, 71, 3, n3);
    // i3 = 0 at bits 74..76 is already clear.
    payload
}

fn unpack_value71(payload: &Payload) -> u128 {
    let mut value = 0u128;
    for k in 0..71 {
        value = value << 1 | u128::from(ftx_core::bit_get(payload, k));
    }
    value
}

/// Pack a classified message into its 77-bit payload. Hashed and base calls
/// are recorded in `store` so later hash-only references resolve.
pub fn pack(message: &Message, store: &dyn CallsignStore) -> Result<Payload, MessageError> {
    match message {
        Message::Standard {
            call_to,
            call_de,
            exchange,
        } => pack_standard(call_to, call_de, exchange, store),
        Message::FreeText { text } => pack_text(&normalize(text)),
        Message::Telemetry { data } => pack_telemetry(data),
        Message::NonStandard { .. } | Message::Invalid => Err(MessageError::UnsupportedType),
    }
}

/// Recover the message carried by a 77-bit payload.
pub fn unpack(payload: &Payload, store: &dyn CallsignStore) -> Result<Message, MessageError> {
    let i3 = unpack_field(payload, 74, 3) as u8;
    match i3 {
        0 => {
            let n3 = unpack_field(payload, 71, 3) as u8;
            match n3 {
                0 => {
                    let mut value = unpack_value71(payload);
                    let mut chars = [0u8; MAX_TEXT_CHARS];
                    for slot in chars.iter_mut().rev() {
                        let idx = (value % 42) as usize;
                        value /= 42;
                        *slot = CHARSET_FREETEXT[idx];
                    }
                    if value != 0 {
                        return Err(MessageError::InvalidCharacter);
                    }
                    let text = String::from_utf8(chars.to_vec()).expect("ascii");
                    Ok(Message::FreeText {
                        text: text.trim().to_owned(),
                    })
                }
                5 => {
                    let value = unpack_value71(payload);
                    let mut data = [0u8; TELEMETRY_BYTES];
                    for (i, slot) in data.iter_mut().enumerate() {
                        *slot = (value >> (8 * (TELEMETRY_BYTES - 1 - i))) as u8;
                    }
                    Ok(Message::Telemetry { data })
                }
                _ => Ok(Message::NonStandard {
                    i3,
                    n3,
                    payload: *payload,
                }),
            }
        }
        1 | 2 => {
            let n29a = unpack_field(payload, 0, 29);
            let n29b = unpack_field(payload, 29, 29);
            let g16 = unpack_field(payload, 58, 16) as u16;

            let mut call_to = unpack_call((n29a >> 1) as u32, store)?;
            let mut call_de = unpack_call((n29b >> 1) as u32, store)?;
            let suffix = if i3 == 1 { "/R" } else { "/P" };
            if n29a & 1 == 1 && !call_to.starts_with('<') && !is_token_call(&call_to) {
                call_to.push_str(suffix);
            }
            if n29b & 1 == 1 && !call_de.starts_with('<') && !is_token_call(&call_de) {
                call_de.push_str(suffix);
            }
            let exchange = unpack_exchange(g16)?;
            Ok(Message::Standard {
                call_to,
                call_de,
                exchange,
            })
        }
        _ => Ok(Message::NonStandard {
            i3,
            n3: 0,
            payload: *payload,
        }),
    }
}

fn is_token_call(call: &str) -> bool {
    call == "DE" || call == "QRZ" || call == "CQ" || call.starts_with("CQ ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftx_core::bit_get;
    use ftx_hash::CallsignHashTable;

    fn round_trip(text: &str) -> String {
        let store = CallsignHashTable::new();
        let msg = parse(text);
        let payload = pack(&msg, &store).expect("pack ok");
        let back = unpack(&payload, &store).expect("unpack ok");
        back.to_string()
    }

    #[test]
    fn cq_with_grid_round_trips() {
        let store = CallsignHashTable::new();
        let msg = parse("CQ K1ABC FN42");
        assert_eq!(
            msg,
            Message::Standard {
                call_to: "CQ".to_owned(),
                call_de: "K1ABC".to_owned(),
                exchange: Exchange::Grid {
                    locator: "FN42".to_owned(),
                    ack: false,
                },
            }
        );

        let payload = pack(&msg, &store).expect("pack ok");
        // Message type one: bits 74..76 are 001.
        assert!(!bit_get(&payload, 74));
        assert!(!bit_get(&payload, 75));
        assert!(bit_get(&payload, 76));
        // Padding bits beyond 77 stay clear.
        assert_eq!(payload[9] & 0x07, 0);

        assert_eq!(round_trip("CQ K1ABC FN42"), "CQ K1ABC FN42");
    }

    #[test]
    fn report_exchange_field_value() {
        let store = CallsignHashTable::new();
        let msg = parse("K1ABC W9XYZ -10");
        let payload = pack(&msg, &store).expect("pack ok");
        let g16 = unpack_field(&payload, 58, 16) as u16;
        assert_eq!(g16 & 0x8000, 0);
        assert_eq!(g16 & 0x7FFF, MAXGRID4 + 25);
        assert_eq!(round_trip("K1ABC W9XYZ -10"), "K1ABC W9XYZ -10");
    }

    #[test]
    fn standard_exchanges_round_trip() {
        for text in [
            "K1ABC W9XYZ RRR",
            "K1ABC W9XYZ RR73",
            "K1ABC W9XYZ 73",
            "K1ABC W9XYZ R-10",
            "K1ABC W9XYZ R+05",
            "K1ABC W9XYZ +30",
            "K1ABC W9XYZ -30",
            "K1ABC W9XYZ R FN42",
            "W9XYZ K1ABC",
            "QRZ K1ABC FN42",
            "DE W9XYZ RR73",
        ] {
            assert_eq!(round_trip(text), text, "{text}");
        }
    }

    #[test]
    fn rr73_is_a_token_not_a_grid() {
        let msg = parse("K1ABC W9XYZ RR73");
        assert!(matches!(
            msg,
            Message::Standard {
                exchange: Exchange::Rr73,
                ..
            }
        ));
    }

    #[test]
    fn cq_subforms_round_trip() {
        assert_eq!(round_trip("CQ 599 K1ABC"), "CQ 599 K1ABC");
        assert_eq!(round_trip("CQ POTA K1ABC FN42"), "CQ POTA K1ABC FN42");
        assert_eq!(round_trip("CQ DX W9XYZ"), "CQ DX W9XYZ");
        assert_eq!(round_trip("CQ A K1ABC"), "CQ A K1ABC");
    }

    #[test]
    fn rover_and_portable_suffixes() {
        assert_eq!(round_trip("K1ABC/R W9XYZ/R R-10"), "K1ABC/R W9XYZ/R R-10");
        assert_eq!(round_trip("K1ABC/P W9XYZ 73"), "K1ABC/P W9XYZ 73");

        let store = CallsignHashTable::new();
        let msg = parse("K1ABC/P W9XYZ 73");
        let payload = pack(&msg, &store).expect("pack ok");
        assert_eq!(unpack_field(&payload, 74, 3), 2);
    }

    #[test]
    fn mixed_suffixes_do_not_classify_standard() {
        // /R and /P need different type codes, so the pair cannot pack.
        let msg = parse("K1ABC/R W9XYZ/P 73");
        assert!(!matches!(msg, Message::Standard { .. }));
    }

    #[test]
    fn country_prefix_contractions_round_trip() {
        assert_eq!(round_trip("3DA0RS K1ABC RR73"), "3DA0RS K1ABC RR73");
        assert_eq!(round_trip("3XY1A W9XYZ FN42"), "3XY1A W9XYZ FN42");
    }

    #[test]
    fn compound_call_goes_through_hash_table() {
        let store = CallsignHashTable::new();
        let msg = parse("PJ4/K1ABC W9XYZ 73");
        let payload = pack(&msg, &store).expect("pack ok");

        // Same table: the hashed call resolves, rendered in brackets.
        let back = unpack(&payload, &store).expect("unpack ok");
        assert_eq!(back.to_string(), "<PJ4/K1ABC> W9XYZ 73");

        // Fresh table: the hash cannot be resolved.
        let empty = CallsignHashTable::new();
        let back = unpack(&payload, &empty).expect("unpack ok");
        assert_eq!(back.to_string(), "<...> W9XYZ 73");
    }

    #[test]
    fn unpacked_calls_populate_the_table() {
        let store = CallsignHashTable::new();
        let payload = pack(&parse("CQ K1ABC FN42"), &store).expect("pack ok");

        let rx_store = CallsignHashTable::new();
        unpack(&payload, &rx_store).expect("unpack ok");
        let n22 = ftx_hash::hash22("K1ABC");
        assert_eq!(
            rx_store.lookup(HashWidth::H22, n22).as_deref(),
            Some("K1ABC")
        );
    }

    #[test]
    fn free_text_round_trips() {
        assert_eq!(round_trip("TNX BOB 73 GL"), "TNX BOB 73 GL");
        assert_eq!(round_trip("HELLO"), "HELLO");
        assert_eq!(round_trip("5.9 +/-2?"), "5.9 +/-2?");
    }

    #[test]
    fn overlong_free_text_is_rejected_at_pack() {
        let store = CallsignHashTable::new();
        let msg = parse("TNX FOR QSO 73");
        assert!(matches!(msg, Message::FreeText { .. }));
        assert_eq!(pack(&msg, &store), Err(MessageError::MessageTooLong));
    }

    #[test]
    fn free_text_with_bad_character_is_invalid() {
        assert_eq!(parse("HI #1"), Message::Invalid);
    }

    #[test]
    fn bare_numbers_are_not_callsigns() {
        assert!(matches!(parse("K1ABC 73"), Message::FreeText { .. }));
        assert!(matches!(parse("K1ABC 599"), Message::FreeText { .. }));
    }

    #[test]
    fn telemetry_round_trips() {
        let text = "123456789ABCDEF012";
        let msg = parse(text);
        assert!(matches!(msg, Message::Telemetry { .. }));
        assert_eq!(round_trip(text), text);
    }

    #[test]
    fn telemetry_over_71_bits_is_invalid() {
        // Leading hex digit above 7 needs a 72nd bit.
        assert_eq!(parse("823456789ABCDEF012"), Message::Invalid);
    }

    #[test]
    fn six_char_locator_packs_as_its_square() {
        assert_eq!(round_trip("K1ABC W9XYZ FN42AB"), "K1ABC W9XYZ FN42");
    }

    #[test]
    fn nonstandard_types_are_preserved_but_not_packable() {
        let store = CallsignHashTable::new();
        let mut payload = Payload::default();
        pack_field(&mut payload, 74, 3, 4);
        let msg = unpack(&payload, &store).expect("unpack ok");
        assert_eq!(
            msg,
            Message::NonStandard {
                i3: 4,
                n3: 0,
                payload,
            }
        );
        assert_eq!(pack(&msg, &store), Err(MessageError::UnsupportedType));
    }

    #[test]
    fn n3_subtypes_are_preserved() {
        let store = CallsignHashTable::new();
        let mut payload = Payload::default();
        pack_field(&mut payload, 71, 3, 2);
        let msg = unpack(&payload, &store).expect("unpack ok");
        assert!(matches!(msg, Message::NonStandard { i3: 0, n3: 2, .. }));
    }

    #[test]
    fn normalisation_collapses_whitespace_and_case() {
        assert_eq!(normalize("  cq   k1abc\tfn42 "), "CQ K1ABC FN42");
        assert_eq!(round_trip("cq k1abc  fn42"), "CQ K1ABC FN42");
    }

    #[test]
    fn grid_field_limits() {
        let store = CallsignHashTable::new();
        let msg = Message::Standard {
            call_to: "K1ABC".to_owned(),
            call_de: "W9XYZ".to_owned(),
            exchange: Exchange::Report { db: 31, ack: false },
        };
        assert_eq!(pack(&msg, &store), Err(MessageError::InvalidReport));

        let msg = Message::Standard {
            call_to: "K1ABC".to_owned(),
            call_de: "W9XYZ".to_owned(),
            exchange: Exchange::Grid {
                locator: "ZZ99".to_owned(),
                ack: false,
            },
        };
        assert_eq!(pack(&msg, &store), Err(MessageError::InvalidLocator));
    }

    #[test]
    fn bad_exchange_values_error_on_unpack() {
        let store = CallsignHashTable::new();
        let mut payload = pack(&parse("K1ABC W9XYZ 73"), &store).expect("pack ok");
        // Overwrite the exchange field with a value past the report range.
        pack_field(&mut payload, 58, 16, u64::from(MAXGRID4) + 70);
        assert_eq!(
            unpack(&payload, &store),
            Err(MessageError::InvalidLocator)
        );
    }
}
