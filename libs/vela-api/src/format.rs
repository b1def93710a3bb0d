/// Significant digits used when a float is rendered as text.
pub const FLOAT_DIGITS: usize = 6;

/// Render a float for reporting.
///
/// `nan`, `inf` and `-inf` are the literal tokens. Finite values use `%g`
/// with [`FLOAT_DIGITS`] significant digits; integral results keep a trailing
/// `.0` so they stay distinguishable from integers.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let g = format_g(x, FLOAT_DIGITS);
    if g.contains(['.', 'e']) {
        g
    } else {
        format!("{g}.0")
    }
}

/// C `%.{precision}g` for finite values.
pub fn format_g(x: f64, precision: usize) -> String {
    let precision = precision.max(1);
    if x == 0.0 {
        return if x.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    // Scientific rendering gives the exponent after rounding to `precision` digits.
    let sci = format!("{:.*e}", precision - 1, x);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= precision as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exp.abs())
    } else {
        let decimals = (precision as i32 - 1 - exp) as usize;
        trim_fraction(&format!("{:.*}", decimals, x))
    }
}

fn trim_fraction(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

/// Quote a string the way it prints inside a tuple.
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_tokens() {
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
        assert_eq!(format_float(f64::NAN), "nan");
    }

    #[test]
    fn six_significant_digits() {
        assert_eq!(format_float(std::f64::consts::PI), "3.14159");
        assert_eq!(format_float(std::f64::consts::E), "2.71828");
        assert_eq!(format_float(std::f64::consts::TAU), "6.28319");
        assert_eq!(format_float(0.5), "0.5");
        assert_eq!(format_float(-45.0), "-45.0");
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(-0.0), "-0.0");
    }

    #[test]
    fn exponent_form() {
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(0.0001), "0.0001");
        assert_eq!(format_float(0.00001234), "1.234e-05");
        assert_eq!(format_float(999999.7), "1e+06");
        assert_eq!(format_float(123456.0), "123456.0");
    }

    #[test]
    fn quoting() {
        assert_eq!(quote_str("abc"), "'abc'");
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(quote_str("a\nb"), "'a\\nb'");
    }
}
