pub const MSC_SCHEMA: &str = r#"
MSC-Records DEFINITIONS IMPLICIT TAGS ::=
BEGIN

CallEventDataFile ::= SEQUENCE
{
    headerRecord [0] INTEGER,
    callEventRecords [1] SEQUENCE OF CallEventRecord
}

CallEventRecord ::= CHOICE
{
    moCallRecord [0] MOCallRecord,
    groupCallRecord [1] GroupCallRecord
}

MOCallRecord ::= SET
{
    recordType [0] INTEGER,
    servedIMSI [1] IMSI,
    calledNumber [2] CalledNumber OPTIONAL
}

-- vendors disagree on the address alternatives
GroupCallRecord ::= SET
{
    recordType [0] INTEGER,
    subscriberIMSI [1] IMSI,
    servedPartyAddress [6] PartyAddress OPTIONAL
}

PartyAddress ::= CHOICE
{
    iPBinV4Address [0] OCTET STRING,
    iPTextV4Address [2] IA5String
}

IMSI ::= OCTET STRING
CalledNumber ::= OCTET STRING

END
"#;

/// One element with a short-form length.
pub fn tlv(tag: &[u8], content: &[u8]) -> Vec<u8> {
    assert!(content.len() < 0x80);
    let mut out = tag.to_vec();
    out.push(content.len() as u8);
    out.extend_from_slice(content);
    out
}
