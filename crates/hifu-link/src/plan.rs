//! Plan transfer: per-axis serialization and spot reconstruction
//!
//! Spots travel as three parallel maps (X, Y, Z) keyed by layer. Index `i` of
//! the three sequences of a layer makes up one spot, so the sequences must
//! have the same length and order; [`AxisMaps::reconstruct`] refuses to
//! rebuild a plan when they do not.

use crate::protocol::{FrameWriter, Header, ProtocolError, WireRead, WireWrite};
use crate::receipt::Receipt;
use crate::types::{Coordinate, GroupKey, GroupedSpotMap, Plan, SonicationParameter, Spot3D, SpotOrder};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use tracing::{debug, trace};

type AxisMap = BTreeMap<GroupKey, Vec<Coordinate>>;

/// Spot coordinates split per axis
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AxisMaps {
    pub x: AxisMap,
    pub y: AxisMap,
    pub z: AxisMap,
}

impl AxisMaps {
    /// Split every layer into index-aligned X, Y and Z sequences
    pub fn split(spots: &GroupedSpotMap) -> Self {
        let mut axes = Self::default();
        for (key, layer) in spots {
            axes.x.insert(*key, layer.iter().map(|spot| spot.x).collect());
            axes.y.insert(*key, layer.iter().map(|spot| spot.y).collect());
            axes.z.insert(*key, layer.iter().map(|spot| spot.z).collect());
        }
        axes
    }

    /// Zip the three axes back into spots
    ///
    /// Fails on the first layer that is missing from an axis or whose axis
    /// sequences differ in length.
    pub fn reconstruct(&self) -> Result<GroupedSpotMap, ProtocolError> {
        let keys: BTreeSet<GroupKey> = self
            .x
            .keys()
            .chain(self.y.keys())
            .chain(self.z.keys())
            .copied()
            .collect();

        let mut spots = GroupedSpotMap::new();
        for key in keys {
            let (Some(xs), Some(ys), Some(zs)) =
                (self.x.get(&key), self.y.get(&key), self.z.get(&key))
            else {
                return Err(self.mismatch(key));
            };
            if xs.len() != ys.len() || xs.len() != zs.len() {
                return Err(self.mismatch(key));
            }

            let layer = xs
                .iter()
                .zip(ys)
                .zip(zs)
                .map(|((&x, &y), &z)| Spot3D::new(x, y, z))
                .collect();
            spots.insert(key, layer);
        }
        Ok(spots)
    }

    fn mismatch(&self, key: GroupKey) -> ProtocolError {
        let len = |map: &AxisMap| map.get(&key).map_or(0, Vec::len);
        ProtocolError::AxisMismatch {
            key,
            x: len(&self.x),
            y: len(&self.y),
            z: len(&self.z),
        }
    }
}

/// Contents of a PLAN message as it appears on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct PlanTransfer {
    pub axes: AxisMaps,
    pub spot_order: SpotOrder,
    pub parameter: SonicationParameter,
    pub receipt: Receipt,
}

/// A rebuilt plan together with the receipt that came with it
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDelivery {
    pub plan: Plan,
    pub receipt: Receipt,
}

impl PlanTransfer {
    pub fn new(plan: &Plan, receipt: Receipt) -> Self {
        Self {
            axes: AxisMaps::split(&plan.spots),
            spot_order: plan.spot_order.clone(),
            parameter: plan.parameter,
            receipt,
        }
    }

    /// Encode the complete PLAN frame, header included
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut frame = FrameWriter::new(Header::Plan);
        let out = frame.payload();

        for axis in [&self.axes.x, &self.axes.y, &self.axes.z] {
            out.write_keyed_seq(axis, |w, value| w.write_f64::<BigEndian>(*value))?;
        }
        out.write_keyed_seq(&self.spot_order, |w, index| w.write_i32::<BigEndian>(*index))?;

        out.write_f64::<BigEndian>(self.parameter.volt)?;
        out.write_i32::<BigEndian>(self.parameter.total_time)?;
        out.write_i32::<BigEndian>(self.parameter.period)?;
        out.write_i32::<BigEndian>(self.parameter.duty_cycle)?;
        out.write_i32::<BigEndian>(self.parameter.cooling_time)?;
        out.write_string(self.receipt.as_str())?;

        let frame = frame.finish()?;
        debug!(
            "Encoded plan: {} layers, {} bytes, receipt \"{}\"",
            self.axes.x.len(),
            frame.len(),
            self.receipt
        );
        Ok(frame)
    }

    /// Decode the payload that follows the `[tag][length]` prefix
    pub fn decode<R: Read>(reader: &mut R) -> Result<Self, ProtocolError> {
        let x = reader.read_keyed_seq(|r| r.read_f64::<BigEndian>())?;
        let y = reader.read_keyed_seq(|r| r.read_f64::<BigEndian>())?;
        let z = reader.read_keyed_seq(|r| r.read_f64::<BigEndian>())?;
        let spot_order = reader.read_keyed_seq(|r| r.read_i32::<BigEndian>())?;

        let parameter = SonicationParameter {
            volt: reader.read_f64::<BigEndian>()?,
            total_time: reader.read_i32::<BigEndian>()?,
            period: reader.read_i32::<BigEndian>()?,
            duty_cycle: reader.read_i32::<BigEndian>()?,
            cooling_time: reader.read_i32::<BigEndian>()?,
        };
        let receipt = Receipt::from(reader.read_string()?);

        trace!("Decoded plan transfer with receipt \"{}\"", receipt);
        Ok(Self {
            axes: AxisMaps { x, y, z },
            spot_order,
            parameter,
            receipt,
        })
    }

    /// Rebuild the grouped spots
    pub fn reconstruct(self) -> Result<PlanDelivery, ProtocolError> {
        let spots = self.axes.reconstruct()?;
        Ok(PlanDelivery {
            plan: Plan::new(spots, self.spot_order, self.parameter),
            receipt: self.receipt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Message, Protocol};
    use std::io::Cursor;

    fn example_plan() -> Plan {
        let mut spots = GroupedSpotMap::new();
        spots.insert(
            GroupKey::new(1.0),
            vec![Spot3D::new(0.0, 0.0, 0.0), Spot3D::new(1.0, 1.0, 1.0)],
        );
        spots.insert(GroupKey::new(2.0), vec![Spot3D::new(2.0, 2.0, 2.0)]);

        let mut spot_order = SpotOrder::new();
        spot_order.insert(GroupKey::new(1.0), vec![1, 0]);
        spot_order.insert(GroupKey::new(2.0), vec![0]);

        Plan::new(
            spots,
            spot_order,
            SonicationParameter {
                volt: 10.0,
                total_time: 15,
                period: 500,
                duty_cycle: 100,
                cooling_time: 300,
            },
        )
    }

    fn decode_frame(frame: Vec<u8>) -> PlanTransfer {
        match Protocol::default().read_message(&mut Cursor::new(frame)).unwrap() {
            Some(Message::Plan(transfer)) => transfer,
            other => panic!("expected a plan, got {other:?}"),
        }
    }

    #[test]
    fn test_example_plan_round_trip() {
        let plan = example_plan();
        let receipt = Receipt::new("From: ServerName, To: ClientName, Time: 1");
        let frame = PlanTransfer::new(&plan, receipt.clone()).encode().unwrap();

        let delivery = decode_frame(frame).reconstruct().unwrap();
        assert_eq!(delivery.plan, plan);
        assert!(receipt.matches(delivery.receipt.as_str()));
    }

    #[test]
    fn test_layer_order_preserved() {
        let mut plan = example_plan();
        let layer: Vec<Spot3D> = (0..50)
            .map(|i| Spot3D::new(i as f64 * 0.25, -(i as f64), 3.5))
            .collect();
        plan.spots.insert(GroupKey::new(-7.5), layer.clone());

        let frame = PlanTransfer::new(&plan, Receipt::default()).encode().unwrap();
        let delivery = decode_frame(frame).reconstruct().unwrap();
        assert_eq!(delivery.plan.spots[&GroupKey::new(-7.5)], layer);
    }

    #[test]
    fn test_frame_length_matches_buffer() {
        let frame = PlanTransfer::new(&example_plan(), Receipt::new("r"))
            .encode()
            .unwrap();
        assert_eq!(&frame[..8], &2i64.to_be_bytes());
        assert_eq!(&frame[8..16], &(frame.len() as i64).to_be_bytes());
    }

    #[test]
    fn test_axis_length_mismatch_detected() {
        let mut axes = AxisMaps::split(&example_plan().spots);
        axes.y.get_mut(&GroupKey::new(1.0)).unwrap().pop();

        let result = axes.reconstruct();
        assert!(matches!(
            result,
            Err(ProtocolError::AxisMismatch { x: 2, y: 1, z: 2, .. })
        ));
    }

    #[test]
    fn test_missing_axis_key_detected() {
        let mut axes = AxisMaps::split(&example_plan().spots);
        axes.z.remove(&GroupKey::new(2.0));

        let result = axes.reconstruct();
        assert!(matches!(
            result,
            Err(ProtocolError::AxisMismatch { x: 1, y: 1, z: 0, .. })
        ));
    }

    #[test]
    fn test_mismatch_detected_after_wire_transfer() {
        let mut transfer = PlanTransfer::new(&example_plan(), Receipt::new("r"));
        transfer
            .axes
            .x
            .get_mut(&GroupKey::new(2.0))
            .unwrap()
            .push(9.0);

        let decoded = decode_frame(transfer.encode().unwrap());
        assert!(matches!(
            decoded.reconstruct(),
            Err(ProtocolError::AxisMismatch { x: 2, y: 1, z: 1, .. })
        ));
    }

    #[test]
    fn test_spot_order_not_enforced() {
        let mut plan = example_plan();
        plan.spot_order.insert(GroupKey::new(2.0), vec![0, 1, 2, 3]);

        let frame = PlanTransfer::new(&plan, Receipt::default()).encode().unwrap();
        let delivery = decode_frame(frame).reconstruct().unwrap();
        assert_eq!(delivery.plan.spot_order_mismatches(), vec![GroupKey::new(2.0)]);
    }

    #[test]
    fn test_generated_plans_round_trip() {
        let keys = [-12.5f32, -1.0, 0.0, 0.1, 0.375, 3.0, 250.75];
        for layers in 1..=keys.len() {
            for base in 0..4 {
                let mut spots = GroupedSpotMap::new();
                let mut spot_order = SpotOrder::new();
                for (i, key) in keys.iter().take(layers).enumerate() {
                    // Every fourth layer comes out empty
                    let count = (base + i) % 4;
                    let layer = (0..count)
                        .map(|j| Spot3D::new(j as f64 * 0.5 - 1.0, *key as f64, -(i as f64) / 3.0))
                        .collect();
                    spots.insert(GroupKey::new(*key), layer);
                    spot_order.insert(GroupKey::new(*key), (0..count as i32).rev().collect());
                }
                let plan = Plan::new(spots, spot_order, SonicationParameter::default());

                let frame = PlanTransfer::new(&plan, Receipt::new("gen")).encode().unwrap();
                let delivery = decode_frame(frame).reconstruct().unwrap();
                assert_eq!(delivery.plan, plan, "layers={layers} base={base}");
            }
        }
    }

    #[test]
    fn test_colliding_wire_keys_rejected() {
        let mut frame = FrameWriter::new(Header::Plan);
        let out = frame.payload();
        for _ in 0..3 {
            out.write_count(2).unwrap();
            out.write_f64::<BigEndian>(1.0).unwrap();
            out.write_count(2).unwrap();
            out.write_f64::<BigEndian>(1.0).unwrap();
            out.write_f64::<BigEndian>(2.0).unwrap();
            // Narrows to the same f32 as 1.0
            out.write_f64::<BigEndian>(1.0 + 1e-12).unwrap();
            out.write_count(1).unwrap();
            out.write_f64::<BigEndian>(9.0).unwrap();
        }
        out.write_count(0).unwrap();
        out.write_f64::<BigEndian>(10.0).unwrap();
        for value in [15, 500, 100, 300] {
            out.write_i32::<BigEndian>(value).unwrap();
        }
        out.write_string("r").unwrap();
        let frame = frame.finish().unwrap();

        let result = Protocol::default().read_message(&mut Cursor::new(frame));
        assert!(matches!(result, Err(ProtocolError::InvalidGroupKey(_))));
    }
}
