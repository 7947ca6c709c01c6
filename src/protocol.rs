use crate::crc8::compute_checksum;
use crate::Error;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Number of cell voltage words carried by a measurement frame.
pub const CELL_COUNT: usize = 20;

/// Base year of the packed date encoding.
pub const DATE_BASE_YEAR: u16 = 1980;

const MIN_FRAME_LENGTH: usize = 2;
const PRODUCTION_DATA_LENGTH: usize = 32;

// Templates start with the total frame length, checksum byte included.
const DATA_MEASUREMENTS_TEMPLATE: [u8; 3] = [0x04, 0x21, 0x00];
const USAGE_SUMMARY_TEMPLATE: [u8; 3] = [0x04, 0x22, 0x00];
const PRODUCTION_DATA_TEMPLATE: [u8; 3] = [0x04, 0x23, 0x00];
const MOSFET_ON_TEMPLATE: [u8; 4] = [0x05, b'C', b'O', b'N'];
const MOSFET_OFF_TEMPLATE: [u8; 4] = [0x05, b'C', b'O', b'F'];

macro_rules! read_bit {
    ($word:expr,$position:expr) => {
        ($word >> $position) & 1 != 0
    };
}

/// The closed set of commands understood by the BMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    DataMeasurements,
    UsageSummary,
    ProductionData,
    MosfetOn,
    MosfetOff,
}

impl CommandType {
    pub const ALL: [CommandType; 5] = [
        CommandType::DataMeasurements,
        CommandType::UsageSummary,
        CommandType::ProductionData,
        CommandType::MosfetOn,
        CommandType::MosfetOff,
    ];

    /// Mosfet command reaching the requested state.
    pub fn mosfet(enable: bool) -> Self {
        if enable {
            CommandType::MosfetOn
        } else {
            CommandType::MosfetOff
        }
    }

    /// Fixed command body, without checksum.
    pub fn template(self) -> &'static [u8] {
        match self {
            CommandType::DataMeasurements => &DATA_MEASUREMENTS_TEMPLATE,
            CommandType::UsageSummary => &USAGE_SUMMARY_TEMPLATE,
            CommandType::ProductionData => &PRODUCTION_DATA_TEMPLATE,
            CommandType::MosfetOn => &MOSFET_ON_TEMPLATE,
            CommandType::MosfetOff => &MOSFET_OFF_TEMPLATE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandType::DataMeasurements => "DATA_MEASUREMENTS",
            CommandType::UsageSummary => "USAGE_SUMMARY",
            CommandType::ProductionData => "PRODUCTION_DATA",
            CommandType::MosfetOn => "MOSFET_ON",
            CommandType::MosfetOff => "MOSFET_OFF",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CommandType {
    type Err = Error;

    /// Accepts `DATA_MEASUREMENTS` as well as `data-measurements`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        CommandType::ALL
            .into_iter()
            .find(|command| command.name() == normalized)
            .ok_or_else(|| Error::InvalidCommandType(s.to_string()))
    }
}

/// Builds the frame written to the characteristic: template followed by its CRC-8.
pub fn generate_command_payload(command: CommandType) -> Vec<u8> {
    let frame = append_checksum(command.template());
    log::trace!("{command} payload: {}", hex::encode(&frame));
    frame
}

/// Returns `body` with its checksum byte appended.
pub fn append_checksum(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + 1);
    frame.extend_from_slice(body);
    frame.push(compute_checksum(body));
    frame
}

/// Whether `chunk` is the device echoing one of the mosfet commands.
pub fn is_mosfet_echo(chunk: &[u8]) -> bool {
    [CommandType::MosfetOn, CommandType::MosfetOff]
        .into_iter()
        .any(|command| {
            let template = command.template();
            chunk.len() == template.len() + 1
                && chunk.starts_with(template)
                && chunk[template.len()] == compute_checksum(template)
        })
}

/// Checks length and trailing checksum, returning the frame without its checksum byte.
pub fn validate_frame(frame: &[u8]) -> std::result::Result<&[u8], Error> {
    if frame.len() < MIN_FRAME_LENGTH {
        log::warn!("Frame too short - received={}", frame.len());
        return Err(Error::ResponseTooShort {
            len: frame.len(),
            required: MIN_FRAME_LENGTH,
        });
    }
    let (data, received) = frame.split_at(frame.len() - 1);
    let calculated = compute_checksum(data);
    if calculated != received[0] {
        log::warn!(
            "Invalid checksum - calculated={:02X?} received={:02X?}",
            calculated,
            received[0]
        );
        log::trace!("rejected frame: {}", hex::encode(frame));
        return Err(Error::ChecksumMismatch {
            calculated,
            received: received[0],
        });
    }
    Ok(data)
}

/// Bounds checked big-endian field access over a validated frame.
struct FrameReader<'a> {
    data: &'a [u8],
}

impl<'a> FrameReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn bytes(&self, offset: usize, width: usize) -> std::result::Result<&'a [u8], Error> {
        self.data
            .get(offset..offset + width)
            .ok_or(Error::OutOfBoundsRead {
                offset,
                width,
                len: self.data.len(),
            })
    }

    fn word(&self, offset: usize) -> std::result::Result<u16, Error> {
        let bytes = self.bytes(offset, 2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn signed_word(&self, offset: usize) -> std::result::Result<i16, Error> {
        Ok(self.word(offset)? as i16)
    }

    /// 32 bit value composed as `(msb_word << 16) | lsb_word`.
    fn dword(&self, offset: usize) -> std::result::Result<u32, Error> {
        let msb = self.word(offset)?;
        let lsb = self.word(offset + 2)?;
        Ok((u32::from(msb) << 16) | u32::from(lsb))
    }

    fn date(&self, offset: usize) -> std::result::Result<PackedDate, Error> {
        PackedDate::from_word(self.word(offset)?)
    }

    fn time(&self, offset: usize) -> std::result::Result<PackedTime, Error> {
        PackedTime::from_word(self.word(offset)?)
    }

    fn ascii(&self, offset: usize, width: usize, field: &'static str) -> std::result::Result<String, Error> {
        let bytes = self.bytes(offset, width)?;
        if !bytes.iter().all(|b| (0x20..=0x7e).contains(b)) {
            log::warn!("{field} contains non printable characters");
            return Err(Error::NonAsciiData { field });
        }
        Ok(bytes.iter().map(|&b| b as char).collect())
    }
}

/// Calendar date packed as 7 bits year offset from 1980, 4 bits month, 5 bits day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PackedDate {
    year: u16,
    month: u8,
    day: u8,
}

impl PackedDate {
    /// Last year the 7 bit offset can hold.
    pub const MAX_YEAR: u16 = DATE_BASE_YEAR + 0x7f;

    pub fn new(year: u16, month: u8, day: u8) -> std::result::Result<Self, Error> {
        if !(DATE_BASE_YEAR..=Self::MAX_YEAR).contains(&year)
            || !(1..=12).contains(&month)
            || !(1..=31).contains(&day)
        {
            return Err(Error::InvalidDateValue { year, month, day });
        }
        Ok(Self { year, month, day })
    }

    pub fn from_word(word: u16) -> std::result::Result<Self, Error> {
        let year = DATE_BASE_YEAR + (word >> 9);
        let month = ((word >> 5) & 0x0f) as u8;
        let day = (word & 0x1f) as u8;
        Self::new(year, month, day)
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    pub fn day(&self) -> u8 {
        self.day
    }

    pub fn to_word(self) -> u16 {
        ((self.year - DATE_BASE_YEAR) << 9) | (u16::from(self.month) << 5) | u16::from(self.day)
    }
}

impl fmt::Display for PackedDate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Time of day packed as 5 bits hour, 6 bits minute, 5 bits half-seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PackedTime {
    hour: u8,
    minute: u8,
    second: u8,
}

impl PackedTime {
    pub fn new(hour: u8, minute: u8, half_seconds: u8) -> std::result::Result<Self, Error> {
        if hour > 23 || minute > 59 || half_seconds > 29 {
            return Err(Error::InvalidTimeValue {
                hour,
                minute,
                half_seconds,
            });
        }
        Ok(Self {
            hour,
            minute,
            second: half_seconds * 2,
        })
    }

    pub fn from_word(word: u16) -> std::result::Result<Self, Error> {
        let hour = (word >> 11) as u8;
        let minute = ((word >> 5) & 0x3f) as u8;
        let half_seconds = (word & 0x1f) as u8;
        Self::new(hour, minute, half_seconds)
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// Seconds, always even.
    pub fn second(&self) -> u8 {
        self.second
    }

    pub fn to_word(self) -> u16 {
        (u16::from(self.hour) << 11) | (u16::from(self.minute) << 5) | u16::from(self.second / 2)
    }
}

impl fmt::Display for PackedTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// A 16 bit flag bank without documented bit names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlagWord(pub u16);

impl FlagWord {
    pub fn bit(self, position: u8) -> bool {
        position < 16 && read_bit!(self.0, position)
    }

    pub fn bits(self) -> [bool; 16] {
        std::array::from_fn(|i| read_bit!(self.0, i))
    }
}

/// Alarm and warning bank, decoded from the alarm word and the warning word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlarmFlags {
    pub max_current: bool,
    pub high_battery_temp: bool,
    pub high_board_temp: bool,
    pub max_charge_voltage: bool,
    pub min_discharge_voltage: bool,
    pub low_energy_level: bool,
    pub low_charge_temp: bool,
    pub min_charge_voltage: bool,
    pub max_discharge_tension: bool,
    pub low_temp_discharge: bool,
    pub max_charge_current: bool,
    pub max_discharge_continuous_current: bool,
    pub serial_485: bool,
    pub timer_off: bool,
    pub e2prom_error: bool,
    pub max_current_warning: bool,
    pub high_battery_temp_warning: bool,
    pub high_board_temp_warning: bool,
    pub max_charge_voltage_warning: bool,
    pub min_discharge_voltage_warning: bool,
    pub low_energy_level_warning: bool,
    pub low_charge_temp_warning: bool,
    pub min_charge_voltage_warning: bool,
    pub max_discharge_tension_warning: bool,
    pub low_temp_discharge_warning: bool,
    pub max_charge_current_warning: bool,
    pub max_discharge_continuous_current_warning: bool,
    pub charge_contactor: bool,
    pub discharge_contactor: bool,
}

impl AlarmFlags {
    pub fn from_words(alarm: u16, warning: u16) -> Self {
        Self {
            max_current: read_bit!(alarm, 0),
            high_battery_temp: read_bit!(alarm, 1),
            high_board_temp: read_bit!(alarm, 2),
            max_charge_voltage: read_bit!(alarm, 3),
            min_discharge_voltage: read_bit!(alarm, 4),
            low_energy_level: read_bit!(alarm, 5),
            low_charge_temp: read_bit!(alarm, 6),
            min_charge_voltage: read_bit!(alarm, 7),
            max_discharge_tension: read_bit!(alarm, 8),
            low_temp_discharge: read_bit!(alarm, 9),
            max_charge_current: read_bit!(alarm, 10),
            max_discharge_continuous_current: read_bit!(alarm, 11),
            serial_485: read_bit!(alarm, 12),
            timer_off: read_bit!(alarm, 13),
            e2prom_error: read_bit!(alarm, 14),
            max_current_warning: read_bit!(warning, 0),
            high_battery_temp_warning: read_bit!(warning, 1),
            high_board_temp_warning: read_bit!(warning, 2),
            max_charge_voltage_warning: read_bit!(warning, 3),
            min_discharge_voltage_warning: read_bit!(warning, 4),
            low_energy_level_warning: read_bit!(warning, 5),
            low_charge_temp_warning: read_bit!(warning, 6),
            min_charge_voltage_warning: read_bit!(warning, 7),
            max_discharge_tension_warning: read_bit!(warning, 8),
            low_temp_discharge_warning: read_bit!(warning, 9),
            max_charge_current_warning: read_bit!(warning, 10),
            max_discharge_continuous_current_warning: read_bit!(warning, 11),
            charge_contactor: read_bit!(warning, 12),
            discharge_contactor: read_bit!(warning, 13),
        }
    }

    /// True when any alarm (not warning or contactor state) is raised.
    pub fn any_alarm(&self) -> bool {
        self.max_current
            || self.high_battery_temp
            || self.high_board_temp
            || self.max_charge_voltage
            || self.min_discharge_voltage
            || self.low_energy_level
            || self.low_charge_temp
            || self.min_charge_voltage
            || self.max_discharge_tension
            || self.low_temp_discharge
            || self.max_charge_current
            || self.max_discharge_continuous_current
            || self.serial_485
            || self.timer_off
            || self.e2prom_error
    }
}

/// BMS status bank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusFlags {
    pub charger_command: bool,
    pub tool_command: bool,
    pub eeprom_in_programming: bool,
    pub eeprom_alarm: bool,
    pub charge_state: bool,
    pub balancing_type: bool,
    pub discharge_state: bool,
    pub general_alarm: bool,
    pub buzzer_command: bool,
    pub output_available: bool,
    pub charge_completed: bool,
    pub precharge_channel_charge: bool,
    pub precharge_channel_discharge: bool,
    pub charge_relay_command: bool,
    pub mosfet_on: bool,
}

impl From<u16> for StatusFlags {
    fn from(word: u16) -> Self {
        Self {
            charger_command: read_bit!(word, 0),
            tool_command: read_bit!(word, 1),
            eeprom_in_programming: read_bit!(word, 2),
            eeprom_alarm: read_bit!(word, 3),
            charge_state: read_bit!(word, 4),
            balancing_type: read_bit!(word, 5),
            discharge_state: read_bit!(word, 6),
            general_alarm: read_bit!(word, 7),
            buzzer_command: read_bit!(word, 8),
            output_available: read_bit!(word, 9),
            charge_completed: read_bit!(word, 10),
            precharge_channel_charge: read_bit!(word, 11),
            precharge_channel_discharge: read_bit!(word, 12),
            charge_relay_command: read_bit!(word, 13),
            mosfet_on: read_bit!(word, 14),
        }
    }
}

/// Second alarm bank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtendedFlags {
    pub custom_client_flag1: bool,
    pub custom_client_flag2: bool,
    pub custom_client_flag3: bool,
    pub transport_mode: bool,
    pub eeprom_load_error: bool,
    pub max_discharge_repeat_current: bool,
    pub max_continuous_discharge_current: bool,
    pub max_charge_repeat_current: bool,
    pub current_in_int32: bool,
    pub is_master_version: bool,
    pub output_negative_discharge: bool,
    pub output_negative_charge: bool,
}

impl From<u16> for ExtendedFlags {
    fn from(word: u16) -> Self {
        Self {
            custom_client_flag1: read_bit!(word, 0),
            custom_client_flag2: read_bit!(word, 1),
            custom_client_flag3: read_bit!(word, 2),
            transport_mode: read_bit!(word, 3),
            eeprom_load_error: read_bit!(word, 4),
            max_discharge_repeat_current: read_bit!(word, 5),
            max_continuous_discharge_current: read_bit!(word, 6),
            max_charge_repeat_current: read_bit!(word, 7),
            current_in_int32: read_bit!(word, 8),
            is_master_version: read_bit!(word, 9),
            output_negative_discharge: read_bit!(word, 10),
            output_negative_charge: read_bit!(word, 11),
        }
    }
}

/// A response record whose layout belongs to one [`CommandType`].
pub trait Response: Sized {
    const COMMAND: CommandType;

    /// Decodes the checksum-stripped frame.
    fn extract(data: &[u8]) -> std::result::Result<Self, Error>;

    fn request() -> Vec<u8> {
        generate_command_payload(Self::COMMAND)
    }

    fn decode(frame: &[u8]) -> std::result::Result<Self, Error> {
        parse_response(frame)
    }
}

/// Validates `frame` and decodes it as `R`.
pub fn parse_response<R: Response>(frame: &[u8]) -> std::result::Result<R, Error> {
    let data = validate_frame(frame)?;
    R::extract(data)
}

/// Any decoded response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    DataMeasurements(DataMeasurements),
    UsageSummary(UsageSummary),
    ProductionData(ProductionData),
}

/// Decodes `frame` with the layout selected at runtime.
pub fn parse_response_for(
    frame: &[u8],
    command: CommandType,
) -> std::result::Result<Record, Error> {
    match command {
        CommandType::DataMeasurements => parse_response(frame).map(Record::DataMeasurements),
        CommandType::UsageSummary => parse_response(frame).map(Record::UsageSummary),
        CommandType::ProductionData => parse_response(frame).map(Record::ProductionData),
        CommandType::MosfetOn | CommandType::MosfetOff => Err(Error::InvalidCommandType(
            format!("{command} has no response layout"),
        )),
    }
}

mod measurement_offsets {
    pub const AH_NOM: usize = 2;
    pub const COM_EQ: usize = 4;
    pub const FLG_ADJ1: usize = 6;
    pub const FLG_ADJ2: usize = 8;
    pub const TEMP_CELL: usize = 11;
    pub const TEMP_SHUNT: usize = 13;
    pub const CURRENT: usize = 15;
    pub const VOLTAGES: usize = 19;
    pub const AVG_CELL_VOLTAGE: usize = 59;
    pub const STATUS: usize = 61;
    pub const SOC_PERCENT: usize = 63;
    pub const SOC: usize = 69;
    pub const CNT_MAX_CURRENT: usize = 73;
    pub const CHARGE_CYCLES: usize = 75;
    pub const ALARM: usize = 77;
    pub const DATE_RTC: usize = 79;
    pub const HOUR_RTC: usize = 81;
    pub const HOUR_SOC: usize = 83;
    pub const HOUR_CHARG: usize = 85;
    pub const FLAG_BMS1: usize = 87;
    pub const WARNING: usize = 89;
    pub const EXTENDED_FLAGS: usize = 131;
}

/// Live measurements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataMeasurements {
    /// Cell temperature in °C
    pub temp_cell: i16,
    /// Shunt temperature in °C
    pub temp_shunt: i16,
    /// Pack current in A, negative while discharging
    pub current: f32,
    /// Cell voltages in V, always [`CELL_COUNT`] entries. Unpopulated cells read 0.
    pub voltages: Vec<f32>,
    /// Average cell voltage in V
    pub avg_cell_voltage: f32,
    /// State of charge in %
    pub soc_percent: u16,
    /// Remaining charge in Ah
    pub soc: f32,
    /// Nominal capacity in Ah
    pub ah_nom: u16,
    pub cnt_max_current: u16,
    pub charge_cycles: u16,
    pub alarms: AlarmFlags,
    pub status: StatusFlags,
    pub extended_flags: ExtendedFlags,
    pub com_eq: FlagWord,
    pub flg_adj1: FlagWord,
    pub flg_adj2: FlagWord,
    pub flag_bms1: FlagWord,
    pub date_rtc: PackedDate,
    pub hour_rtc: PackedTime,
    pub hour_soc: PackedTime,
    pub hour_charg: PackedTime,
}

impl DataMeasurements {
    pub fn mosfet_on(&self) -> bool {
        self.status.mosfet_on
    }
}

impl Response for DataMeasurements {
    const COMMAND: CommandType = CommandType::DataMeasurements;

    fn extract(data: &[u8]) -> std::result::Result<Self, Error> {
        use measurement_offsets::*;
        let reader = FrameReader::new(data);

        let temp_cell = reader.signed_word(TEMP_CELL)?;
        let temp_shunt = reader.signed_word(TEMP_SHUNT)?;
        // scaled after composing the full 32 bit value
        let current = reader.dword(CURRENT)? as i32 as f32 / 100.0;
        let voltages = (0..CELL_COUNT)
            .map(|i| {
                let volt = reader.word(VOLTAGES + 2 * i)? as f32 / 1000.0;
                log::trace!("cell #{} volt={}", i + 1, volt);
                Ok(volt)
            })
            .collect::<std::result::Result<Vec<f32>, Error>>()?;
        let avg_cell_voltage = reader.word(AVG_CELL_VOLTAGE)? as f32 / 1000.0;
        let status = StatusFlags::from(reader.word(STATUS)?);
        let soc_percent = reader.word(SOC_PERCENT)?;
        let soc = reader.dword(SOC)? as f32 / 100.0;
        let ah_nom = reader.word(AH_NOM)?;
        let cnt_max_current = reader.word(CNT_MAX_CURRENT)?;
        let charge_cycles = reader.word(CHARGE_CYCLES)?;
        let alarms = AlarmFlags::from_words(reader.word(ALARM)?, reader.word(WARNING)?);
        let date_rtc = reader.date(DATE_RTC)?;
        let hour_rtc = reader.time(HOUR_RTC)?;
        let hour_soc = reader.time(HOUR_SOC)?;
        let hour_charg = reader.time(HOUR_CHARG)?;

        Ok(Self {
            temp_cell,
            temp_shunt,
            current,
            voltages,
            avg_cell_voltage,
            soc_percent,
            soc,
            ah_nom,
            cnt_max_current,
            charge_cycles,
            alarms,
            status,
            extended_flags: ExtendedFlags::from(reader.word(EXTENDED_FLAGS)?),
            com_eq: FlagWord(reader.word(COM_EQ)?),
            flg_adj1: FlagWord(reader.word(FLG_ADJ1)?),
            flg_adj2: FlagWord(reader.word(FLG_ADJ2)?),
            flag_bms1: FlagWord(reader.word(FLAG_BMS1)?),
            date_rtc,
            hour_rtc,
            hour_soc,
            hour_charg,
        })
    }
}

/// Lifetime usage counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub cycles_discharge: u16,
    pub cycles_charge: u16,
    pub cnt_max_current: u16,
    /// Date of the last full charge
    pub date_charge: PackedDate,
    /// Counter reported by the BMS as ALL90DCLI
    pub dcli_90: u16,
}

impl Response for UsageSummary {
    const COMMAND: CommandType = CommandType::UsageSummary;

    fn extract(data: &[u8]) -> std::result::Result<Self, Error> {
        let reader = FrameReader::new(data);
        Ok(Self {
            cycles_discharge: reader.word(1)?,
            cycles_charge: reader.word(3)?,
            cnt_max_current: reader.word(5)?,
            date_charge: reader.date(7)?,
            dcli_90: reader.word(9)?,
        })
    }
}

/// Factory data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductionData {
    pub installation_date: PackedDate,
    pub serial_number: String,
    pub tag_data: String,
}

impl Response for ProductionData {
    const COMMAND: CommandType = CommandType::ProductionData;

    fn extract(data: &[u8]) -> std::result::Result<Self, Error> {
        if data.len() < PRODUCTION_DATA_LENGTH {
            log::warn!(
                "Invalid production data size - required={} received={}",
                PRODUCTION_DATA_LENGTH,
                data.len()
            );
            return Err(Error::ResponseTooShort {
                len: data.len(),
                required: PRODUCTION_DATA_LENGTH,
            });
        }
        let reader = FrameReader::new(data);
        let installation_date = reader.date(1)?;
        let serial_number = reader.ascii(3, 10, "serial number")?;
        let tag_data = reader.ascii(14, 18, "tag data")?;
        Ok(Self {
            installation_date,
            serial_number,
            tag_data,
        })
    }
}
