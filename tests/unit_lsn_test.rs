use repguard::core::lsn::Lsn;

#[test]
fn test_parse_standard_form() {
    let lsn: Lsn = "0/1000".parse().unwrap();
    assert_eq!(lsn, Lsn(0x1000));

    let lsn: Lsn = "16/B374D848".parse().unwrap();
    assert_eq!(lsn, Lsn((0x16 << 32) | 0xB374_D848));
}

#[test]
fn test_display_round_trips() {
    for raw in [0u64, 0x1000, (7 << 32) | 0x4800, u32::MAX as u64] {
        let lsn = Lsn(raw);
        let reparsed: Lsn = lsn.to_string().parse().unwrap();
        assert_eq!(reparsed, lsn);
    }
}

#[test]
fn test_ordering_is_numeric_not_textual() {
    // "0/FF" sorts after "0/100" as a string; numerically it must not.
    let small: Lsn = "0/FF".parse().unwrap();
    let large: Lsn = "0/100".parse().unwrap();
    assert!(small < large);

    let high_word: Lsn = "1/0".parse().unwrap();
    let low_word: Lsn = "0/FFFFFFFF".parse().unwrap();
    assert!(high_word > low_word);
}

#[test]
fn test_malformed_input_is_rejected() {
    assert!("".parse::<Lsn>().is_err());
    assert!("1000".parse::<Lsn>().is_err());
    assert!("0/GG".parse::<Lsn>().is_err());
    assert!("0/1/2".parse::<Lsn>().is_err());
    assert!("100000000/0".parse::<Lsn>().is_err());
}

#[test]
fn test_invalid_marker() {
    let lsn: Lsn = "0/0".parse().unwrap();
    assert_eq!(lsn, Lsn::INVALID);
    assert!(!lsn.is_valid());
    assert!(Lsn(1).is_valid());
}

#[test]
fn test_saturating_diff() {
    let ahead = Lsn(0x2000);
    let behind = Lsn(0x1800);
    assert_eq!(ahead.saturating_diff(behind), 0x800);
    assert_eq!(behind.saturating_diff(ahead), 0);
}
