use super::*;
use crate::protocol::{SC_BLOCK_DATA, SC_EXTERNALIZABLE, SC_SERIALIZABLE, SC_WRITE_METHOD};

fn build<F>(f: F) -> Result<Vec<u8>>
where
    F: FnOnce(&mut StreamWriter) -> Result<()>,
{
    let mut w = StreamWriter::new();
    f(&mut w)?;
    w.finish()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|win| win == needle)
}

#[test]
fn empty_stream_is_magic_and_version() {
    assert_eq!(build(|_| Ok(())).unwrap(), [0xAC, 0xED, 0x00, 0x05]);
}

#[test]
fn point_object_byte_exact() {
    // Point { int x = 7 } with serialVersionUID 1.
    let bytes = build(|w| {
        w.object(&Handle::new(), |o| {
            o.descriptors(|descs| {
                descs.desc(|d| {
                    d.type_name("Point");
                    d.uid(1);
                    d.field("x", "int")
                })
            })?;
            o.values(|v| v.int(7))
        })
    })
    .unwrap();
    assert_eq!(
        bytes,
        [
            0xAC, 0xED, 0x00, 0x05, // magic, version
            0x73, // TC_OBJECT
            0x72, // TC_CLASSDESC
            0x00, 0x05, b'P', b'o', b'i', b'n', b't', // class name
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, // uid
            0x02, // SC_SERIALIZABLE
            0x00, 0x01, // field count
            b'I', 0x00, 0x01, b'x', // int x
            0x78, // TC_ENDBLOCKDATA (class annotation)
            0x70, // TC_NULL (chain end)
            0x00, 0x00, 0x00, 0x07, // x = 7
        ]
    );
}

#[test]
fn top_level_primitives() {
    let bytes = build(|w| {
        w.string("hi")?;
        w.null()?;
        w.block_data(&[1, 2])
    })
    .unwrap();
    assert_eq!(
        &bytes[4..],
        [0x74, 0x00, 0x02, b'h', b'i', 0x70, 0x77, 0x02, 1, 2]
    );
}

#[test]
fn reference_points_backwards() {
    let h = Handle::new();
    let bytes = build(|w| {
        w.string_with("once", &h)?;
        w.reference(&h)
    })
    .unwrap();
    assert!(bytes.ends_with(&[0x71, 0x00, 0x7E, 0x00, 0x00]));
}

#[test]
fn reference_to_undeclared_handle_fails() {
    let result = build(|w| w.reference(&Handle::new()));
    assert_eq!(result, Err(crate::Error::HandleUnassigned));
}

#[test]
fn handle_reuse_across_elements_fails() {
    let h = Handle::new();
    let result = build(|w| {
        w.string_with("a", &h)?;
        w.string_with("b", &h)
    });
    assert_eq!(result, Err(crate::Error::HandleAlreadyAssigned));
}

#[test]
fn hierarchy_values_run_base_first() {
    // Descriptors most-derived first, values base first (JOSS 6.4.2
    // nowrclass): Base { int i } then Derived { char c }.
    let bytes = build(|w| {
        w.object(&Handle::new(), |o| {
            o.descriptors(|descs| {
                descs.desc(|d| {
                    d.type_name("Derived");
                    d.uid(2);
                    d.field("c", "char")
                })?;
                descs.desc(|d| {
                    d.type_name("Base");
                    d.uid(1);
                    d.field("i", "int")
                })
            })?;
            o.values(|v| v.int(1))?;
            o.values(|v| v.char(0x41))
        })
    })
    .unwrap();
    assert!(bytes.ends_with(&[0x70, 0x00, 0x00, 0x00, 0x01, 0x00, 0x41]));
}

#[test]
fn enum_handle_order() {
    // TestEnum desc = 0, java.lang.Enum desc = 1, the constant = 2, its
    // name string = 3.
    let e = Handle::new();
    let te = Handle::new();
    let je = Handle::new();
    let name = Handle::new();
    let bytes = build(|w| {
        w.enum_const_with("A", &e, &name, |descs| {
            descs.desc_with(&te, |d| {
                d.type_name("TestEnum");
                d.flags(crate::protocol::SC_SERIALIZABLE | crate::protocol::SC_ENUM);
                Ok(())
            })?;
            descs.desc_with(&je, |d| {
                d.type_name("java.lang.Enum");
                d.flags(crate::protocol::SC_SERIALIZABLE | crate::protocol::SC_ENUM);
                Ok(())
            })
        })?;
        w.reference(&name)
    })
    .unwrap();
    assert_eq!(te.index(), Ok(0));
    assert_eq!(je.index(), Ok(1));
    assert_eq!(e.index(), Ok(2));
    assert_eq!(name.index(), Ok(3));
    // Enum descriptors carry uid 0 regardless of registry state.
    assert!(contains(&bytes, &[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x12]));
    // Trailing reference to the constant-name string.
    assert!(bytes.ends_with(&[0x71, 0x00, 0x7E, 0x00, 0x03]));
}

#[test]
fn primitive_array() {
    let bytes = build(|w| {
        w.array(&Handle::new(), |a| {
            a.descriptors(|descs| {
                descs.desc(|d| {
                    d.type_name("int[]");
                    d.uid(5600894804908749477);
                    Ok(())
                })
            })?;
            a.primitive_elements(&PrimitiveArray::Int(vec![1, 2, 3]))
        })
    })
    .unwrap();
    // Name encoded as [I on the wire.
    assert!(contains(&bytes, &[0x00, 0x02, b'[', b'I']));
    assert!(bytes.ends_with(&[
        0x70, 0x00, 0x00, 0x00, 0x03, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3
    ]));
}

#[test]
fn object_array_count_precedes_elements() {
    // The count is only known when the closure returns, yet it lands on
    // the wire before the element bytes.
    let bytes = build(|w| {
        w.array(&Handle::new(), |a| {
            a.descriptors(|descs| {
                descs.desc(|d| {
                    d.type_name("java.lang.String[]");
                    d.uid(-5921575005990323385);
                    Ok(())
                })
            })?;
            a.elements(|v| {
                v.string("a")?;
                v.null()
            })
        })
    })
    .unwrap();
    assert!(bytes.ends_with(&[
        0x70, // chain end
        0x00, 0x00, 0x00, 0x02, // count
        0x74, 0x00, 0x01, b'a', // "a"
        0x70, // null
    ]));
}

#[test]
fn nested_array_elements_count_separately() {
    // An array inside an elements batch counts as ONE element of the outer
    // array; its own elements only affect the inner count.
    let bytes = build(|w| {
        w.array(&Handle::new(), |a| {
            a.descriptors(|descs| {
                descs.desc(|d| {
                    d.type_name("java.lang.Object[][]");
                    d.uid(1);
                    Ok(())
                })
            })?;
            a.elements(|v| {
                v.array(&Handle::new(), |inner| {
                    inner.descriptors(|descs| {
                        descs.desc(|d| {
                            d.type_name("java.lang.Object[]");
                            d.uid(2);
                            Ok(())
                        })
                    })?;
                    inner.elements(|v| {
                        v.null()?;
                        v.null()?;
                        v.null()
                    })
                })
            })
        })
    })
    .unwrap();
    // Outer count 1 right before the inner TC_ARRAY.
    assert!(contains(&bytes, &[0x00, 0x00, 0x00, 0x01, 0x75]));
    // Inner count 3 followed by three nulls.
    assert!(bytes.ends_with(&[0x00, 0x00, 0x00, 0x03, 0x70, 0x70, 0x70]));
}

#[test]
fn empty_write_object_is_just_terminator() {
    let bytes = build(|w| {
        w.object(&Handle::new(), |o| {
            o.descriptors(|descs| {
                descs.desc(|d| {
                    d.type_name("X");
                    d.uid(1);
                    d.flags(SC_SERIALIZABLE | SC_WRITE_METHOD);
                    Ok(())
                })
            })?;
            o.write_object(|_| Ok(()))
        })
    })
    .unwrap();
    // chain end, then no chunk at all, then TC_ENDBLOCKDATA.
    assert!(bytes.ends_with(&[0x70, 0x78]));
}

#[test]
fn write_object_chunks_around_nested_constructs() {
    let bytes = build(|w| {
        w.object(&Handle::new(), |o| {
            o.descriptors(|descs| {
                descs.desc(|d| {
                    d.type_name("X");
                    d.uid(1);
                    d.flags(SC_SERIALIZABLE | SC_WRITE_METHOD);
                    Ok(())
                })
            })?;
            o.write_object(|d| {
                d.int(1)?;
                d.string("s")?;
                // Block-data mode is restored: this opens a second chunk.
                d.int(2)
            })
        })
    })
    .unwrap();
    assert!(bytes.ends_with(&[
        0x77, 0x04, 0x00, 0x00, 0x00, 0x01, // first chunk
        0x74, 0x00, 0x01, b's', // string element between chunks
        0x77, 0x04, 0x00, 0x00, 0x00, 0x02, // second chunk
        0x78, // terminator
    ]));
}

#[test]
fn long_block_data_uses_blockdatalong() {
    let bytes = build(|w| w.block_data(&[0xAB; 300])).unwrap();
    assert_eq!(bytes[4], 0x7A);
    assert_eq!(&bytes[5..9], [0x00, 0x00, 0x01, 0x2C]);
    assert_eq!(bytes.len(), 9 + 300);
}

#[test]
fn write_external_protocol2() {
    let bytes = build(|w| {
        w.object(&Handle::new(), |o| {
            o.descriptors(|descs| {
                descs.desc(|d| {
                    d.type_name("Ext");
                    d.uid(1);
                    d.flags(SC_EXTERNALIZABLE | SC_BLOCK_DATA);
                    Ok(())
                })
            })?;
            o.write_external(|d| {
                d.int(5)?;
                d.boolean(true)
            })
        })
    })
    .unwrap();
    assert!(bytes.ends_with(&[0x77, 0x05, 0x00, 0x00, 0x00, 0x05, 0x01, 0x78]));
}

#[test]
fn proxy_descriptor_wire_shape() {
    let bytes = build(|w| {
        w.object(&Handle::new(), |o| {
            o.descriptors(|descs| {
                descs.proxy(&["com.example.IA", "com.example.IB"])?;
                descs.desc(|d| {
                    d.type_name("java.lang.reflect.Proxy");
                    d.flags(SC_SERIALIZABLE);
                    d.field("h", "java.lang.reflect.InvocationHandler")
                })
            })?;
            o.values(|v| v.null())
        })
    })
    .unwrap();
    assert!(contains(
        &bytes,
        &[0x7D, 0x00, 0x00, 0x00, 0x02, 0x00, 0x0E] // TC_PROXYCLASSDESC, count, first name length
    ));
    // Proxy uid comes from the preloaded registry.
    assert!(contains(&bytes, &(-2222568056686623797i64).to_be_bytes()));
}

#[test]
fn class_object_element() {
    let bytes = build(|w| {
        w.class(&Handle::new(), |descs| {
            descs.desc(|d| {
                d.type_name("X");
                d.uid(1);
                Ok(())
            })
        })
    })
    .unwrap();
    assert_eq!(bytes[4], 0x76);
    assert!(bytes.ends_with(&[0x78, 0x70]));
}

#[test]
fn descriptor_chain_back_reference() {
    let desc = Handle::new();
    let bytes = build(|w| {
        w.object(&Handle::new(), |o| {
            o.descriptors(|descs| {
                descs.desc_with(&desc, |d| {
                    d.type_name("X");
                    d.uid(1);
                    Ok(())
                })
            })?;
            Ok(())
        })?;
        w.object(&Handle::new(), |o| {
            o.descriptors(|descs| descs.back_ref(&desc))
        })
    })
    .unwrap();
    assert!(bytes.ends_with(&[0x73, 0x71, 0x00, 0x7E, 0x00, 0x00]));
}

#[test]
fn registry_supplies_missing_uid() {
    let bytes = build(|w| {
        w.object(&Handle::new(), |o| {
            o.descriptors(|descs| {
                descs.desc(|d| {
                    d.type_name("java.util.HashMap");
                    d.flags(SC_SERIALIZABLE | SC_WRITE_METHOD);
                    d.field("loadFactor", "float")?;
                    d.field("threshold", "int")
                })
            })?;
            o.values(|v| {
                v.float(0.75)?;
                v.int(12)
            })?;
            o.write_object(|d| d.bytes(&[0, 0, 0, 16, 0, 0, 0, 1]))
        })
    })
    .unwrap();
    assert!(contains(&bytes, &362498820763181265i64.to_be_bytes()));
}

#[test]
fn errors_keep_the_stream_balanced() {
    // A failing closure still runs the construct epilogue; finish() must
    // not panic afterwards.
    let mut w = StreamWriter::new();
    let result = w.object(&Handle::new(), |o| {
        o.descriptors(|descs| {
            descs.desc(|d| {
                d.type_name("X");
                d.uid(1);
                Ok(())
            })
        })?;
        o.values(|v| v.reference(&Handle::new()))
    });
    assert_eq!(result, Err(crate::Error::HandleUnassigned));
    // Depth and batches are balanced again, finish succeeds.
    assert!(w.finish().is_ok());
}
